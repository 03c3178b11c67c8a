//! End-to-end session scenarios driving the engine through full games.

use rand::SeedableRng;
use rand::rngs::StdRng;

use chessmate::{
    Difficulty, GameMode, GameResult, GameSession, GameStatus, Player, RuntimeConfig,
    SessionRuntime, Side, select_move,
};

fn engine_vs_engine(difficulty: Difficulty, seed: u64, max_plies: usize) -> GameSession {
    let mut session = GameSession::start(
        GameMode::Local,
        Player::new("w", "White"),
        Some(Player::new("b", "Black")),
    );
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..max_plies {
        if session.is_over() {
            break;
        }
        let mv = select_move(&session.position().board(), difficulty, &mut rng);
        session.apply_move(mv).expect("Engine picked an illegal move");
    }
    session
}

#[test]
fn test_low_tier_game_alternates_and_stays_consistent() {
    let session = engine_vs_engine(Difficulty::Low, 7, 40);

    // A local session is never waiting and the turn always matches parity.
    assert_ne!(session.status(), GameStatus::Waiting);
    if !session.is_over() {
        let expected = if session.moves().len() % 2 == 0 {
            Side::White
        } else {
            Side::Black
        };
        assert_eq!(session.active_side(), expected);
    }
    assert!(!session.moves().is_empty());
}

#[test]
fn test_games_reach_a_recorded_terminal_state_or_stay_active() {
    for seed in 0..4 {
        let session = engine_vs_engine(Difficulty::Medium, seed, 300);
        match session.status() {
            GameStatus::Finished => {
                assert!(session.result().is_some(), "Finished without a result")
            }
            GameStatus::Active => assert_eq!(session.result(), None),
            other => panic!("Unexpected status {other}"),
        }
    }
}

#[test]
fn test_finished_game_rejects_further_moves() {
    let mut session = GameSession::start_ai(Player::new("u", "User"));
    for san in ["f3", "e5", "g4", "Qh4"] {
        session.apply_san(san).expect("Move failed");
    }
    assert_eq!(session.result(), Some(GameResult::BlackWins));
    assert!(session.apply_san("a3").is_err());
    assert!(session.tick().is_none(), "Finished session must not tick");
}

#[test]
fn test_high_tier_spots_mate_in_one_mid_game() {
    let mut session = GameSession::start_ai(Player::new("u", "User"));
    for san in ["e4", "e5", "Bc4", "Nc6", "Qh5", "Nf6"] {
        session.apply_san(san).expect("Move failed");
    }

    let mut rng = StdRng::seed_from_u64(0);
    let mv = select_move(&session.position().board(), Difficulty::High, &mut rng);
    let applied = session.apply_move(mv).expect("Move failed");
    assert_eq!(applied.outcome().san(), "Qxf7#");
    assert_eq!(*applied.result(), Some(GameResult::WhiteWins));
}

#[test]
fn test_replayed_transcript_matches_original() {
    let session = engine_vs_engine(Difficulty::Low, 42, 30);
    let rebuilt = GameSession::from_snapshot(session.snapshot()).expect("Rebuild failed");
    assert_eq!(rebuilt.moves(), session.moves());
    assert_eq!(rebuilt.status(), session.status());
    assert_eq!(rebuilt.position().board(), session.position().board());
    assert_eq!(rebuilt.export(), session.export());
}

#[tokio::test]
async fn test_runtime_plays_full_ai_exchange() {
    let session = GameSession::start_ai(Player::new("u", "User"));
    let config = RuntimeConfig {
        difficulty: Difficulty::Low,
        engine_delay: std::time::Duration::ZERO,
        tick_interval: None,
        ..RuntimeConfig::default()
    };
    let handle = SessionRuntime::spawn(session, config);

    // Drive ten human plies; after each the engine owes exactly one reply.
    for ply in 0..10u64 {
        let snapshot = handle.snapshot().await.expect("Runtime stopped");
        if snapshot.status().is_terminal() {
            break;
        }
        assert_eq!(snapshot.moves().len(), ply as usize * 2);
        assert_eq!(*snapshot.active_side(), Side::White);

        // Replay locally to find a legal continuation for the human side.
        let local = GameSession::from_snapshot(snapshot).expect("Rebuild failed");
        let mut rng = StdRng::seed_from_u64(ply);
        let mv = select_move(&local.position().board(), Difficulty::Low, &mut rng);
        let promotion = mv
            .get_promotion()
            .map(|p| p.to_string(chessmate::chess::Color::Black).chars().next().unwrap());
        handle
            .apply_move(&mv.get_source().to_string(), &mv.get_dest().to_string(), promotion)
            .await
            .expect("Human move rejected");

        // Wait for the engine's reply (or a terminal state) before the next ply.
        let want = ply as usize * 2 + 2;
        loop {
            let snapshot = handle.snapshot().await.expect("Runtime stopped");
            if snapshot.moves().len() >= want || snapshot.status().is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
    handle.reset().await;
}
