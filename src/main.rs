//! Chessmate - unified CLI
//!
//! Serve games over HTTP, play in the terminal, or inspect statistics.

#![warn(missing_docs)]

use anyhow::Result;
use chessmate::{
    Cli, Command, Difficulty, GameMode, GameRepository, GameSession, MemoryRemoteStore, PlayMode,
    Player, RemoteStore, RestRemoteStore, RuntimeConfig, RuntimeError, SessionEvent,
    SessionHandle, SessionRuntime, Side,
};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, host } => run_serve(host, port).await,
        Command::Play {
            name,
            mode,
            difficulty,
            server_url,
            room,
            db_path,
        } => run_play(name, mode, difficulty, server_url, room, db_path).await,
        Command::Stats { name, db_path } => run_stats(&name, db_path),
    }
}

/// Run the game server other players connect to.
async fn run_serve(host: String, port: u16) -> Result<()> {
    info!(%host, port, "Starting game server");
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    let store = Arc::new(MemoryRemoteStore::new());
    chessmate::serve(listener, store).await?;
    Ok(())
}

/// Set up the session for the chosen mode and drive it from the terminal.
async fn run_play(
    name: String,
    mode: PlayMode,
    difficulty: Difficulty,
    server_url: String,
    room: Option<String>,
    db_path: String,
) -> Result<()> {
    let repo = GameRepository::new(db_path)?;
    repo.run_migrations()?;
    repo.ensure_user(&name)?;
    let player = Player::new(name.clone(), name.clone());

    let mut config = RuntimeConfig {
        difficulty,
        owner_id: Some(name.clone()),
        persistence: Some(Arc::new(repo)),
        ..RuntimeConfig::default()
    };

    // In local mode both players share the terminal, so commands like resign
    // apply to whoever is to move rather than to a fixed seat.
    let (session, my_side) = match mode {
        PlayMode::Ai => (GameSession::start_ai(player), Some(Side::White)),
        PlayMode::Local => {
            let black = Player::new("local-black", "Black");
            let session = GameSession::start(GameMode::Local, player, Some(black));
            (session, None)
        }
        PlayMode::Online => {
            let store = Arc::new(RestRemoteStore::new(server_url));
            let seated = match room {
                Some(code) => {
                    let joined = store.join_room(&code, player).await?;
                    let snapshot = store
                        .fetch_game(*joined.game_id())
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("room {code} points at a missing game"))?;
                    println!("Joined {}'s game.", joined.host().name);
                    (GameSession::from_snapshot(snapshot)?, Some(Side::Black))
                }
                None => {
                    let session = GameSession::start(GameMode::Online, player.clone(), None);
                    store.create_game(session.snapshot()).await?;
                    let room = store.create_room(session.id(), player).await?;
                    println!("Hosting game. Room code: {}", room.code());
                    (session, Some(Side::White))
                }
            };
            config.remote = Some(store as Arc<dyn RemoteStore>);
            seated
        }
    };

    let handle = SessionRuntime::spawn(session, config);
    print_help();
    play_loop(handle, my_side).await
}

/// Terminal loop: session events on one side, player input on the other.
async fn play_loop(handle: SessionHandle, my_side: Option<Side>) -> Result<()> {
    let mut events = handle.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::MoveApplied { san, by_engine }) => {
                    if by_engine {
                        println!("engine plays {san}");
                    } else {
                        println!("{san}");
                    }
                }
                Ok(SessionEvent::GameOver { result }) => {
                    println!("Game over: {result}");
                    println!("{}", handle.export().await?);
                    handle.reset().await;
                    return Ok(());
                }
                Ok(SessionEvent::Rebuilt) => println!("(synced with server)"),
                Ok(SessionEvent::Clock { .. }) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    handle.reset().await;
                    return Ok(());
                };
                if !handle_input(&handle, my_side, line.trim()).await? {
                    handle.reset().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Handles one line of input. Returns `false` when the player quits.
async fn handle_input(
    handle: &SessionHandle,
    my_side: Option<Side>,
    input: &str,
) -> Result<bool> {
    match input {
        "" => {}
        "help" => print_help(),
        "board" => {
            let snapshot = handle.snapshot().await?;
            let session = GameSession::from_snapshot(snapshot)?;
            println!("{}", render_board(&session.position().board()));
        }
        "clock" => {
            let snapshot = handle.snapshot().await?;
            let clocks = snapshot.clocks();
            println!(
                "white {}  black {}",
                format_clock(clocks.white_remaining()),
                format_clock(clocks.black_remaining())
            );
        }
        "resign" => {
            let side = match my_side {
                Some(side) => side,
                None => *handle.snapshot().await?.active_side(),
            };
            report(handle.resign(side).await.map(|r| format!("Resigned: {r}")))?;
        }
        "draw" => {
            report(handle.offer_draw().await.map(|r| format!("Draw: {r}")))?;
        }
        "quit" => return Ok(false),
        mv => {
            let outcome = match parse_coords(mv) {
                Some((from, to, promotion)) => {
                    handle.apply_move(&from, &to, promotion).await
                }
                None => handle.apply_san(mv).await,
            };
            if let Err(err) = outcome {
                match err {
                    RuntimeError::Session(err) => println!("rejected: {err}"),
                    RuntimeError::Stopped => return Ok(false),
                }
            }
        }
    }
    Ok(true)
}

/// Prints an outcome line, treating a session rejection as conversation
/// rather than failure.
fn report(outcome: Result<String, RuntimeError>) -> Result<()> {
    match outcome {
        Ok(line) => println!("{line}"),
        Err(RuntimeError::Session(err)) => println!("rejected: {err}"),
        Err(err @ RuntimeError::Stopped) => return Err(err.into()),
    }
    Ok(())
}

/// Show win/loss/draw statistics for a player.
fn run_stats(name: &str, db_path: String) -> Result<()> {
    let repo = GameRepository::new(db_path)?;
    repo.run_migrations()?;
    let stats = repo.get_aggregated_stats(name)?;
    println!("{name}: {} games", stats.total_games());
    println!(
        "  wins {}  losses {}  draws {}  win rate {:.1}%",
        stats.wins(),
        stats.losses(),
        stats.draws(),
        stats.win_rate()
    );
    for stat in repo.get_player_stats(name)?.iter().take(10) {
        println!(
            "  {} vs {} ({} mode, {} plies) on {}",
            stat.outcome(),
            stat.opponent_name(),
            stat.mode(),
            stat.moves_count(),
            stat.played_at().format("%Y-%m-%d")
        );
    }
    Ok(())
}

/// Recognizes coordinate input like `e2e4` or `e7e8q`.
fn parse_coords(input: &str) -> Option<(String, String, Option<char>)> {
    let bytes = input.as_bytes();
    if !(4..=5).contains(&bytes.len()) {
        return None;
    }
    let square = |b: &[u8]| b[0].is_ascii_lowercase() && (b'a'..=b'h').contains(&b[0])
        && (b'1'..=b'8').contains(&b[1]);
    if !square(&bytes[0..2]) || !square(&bytes[2..4]) {
        return None;
    }
    let promotion = bytes.get(4).map(|b| *b as char);
    Some((input[0..2].to_string(), input[2..4].to_string(), promotion))
}

fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn render_board(board: &chess::Board) -> String {
    let mut out = String::new();
    for rank in (0..8).rev() {
        out.push_str(&format!("{} ", rank + 1));
        for file in 0..8 {
            let square = chess::Square::make_square(
                chess::Rank::from_index(rank),
                chess::File::from_index(file),
            );
            match (board.piece_on(square), board.color_on(square)) {
                (Some(piece), Some(color)) => out.push_str(&piece.to_string(color)),
                _ => out.push('.'),
            }
            out.push(' ');
        }
        out.push('\n');
    }
    out.push_str("  a b c d e f g h");
    out
}

fn print_help() {
    println!("moves: e2e4, e7e8q, or SAN like Nf3");
    println!("commands: board, clock, draw, resign, help, quit");
}
