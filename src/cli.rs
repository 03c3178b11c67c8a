//! Command-line interface for chessmate.

use clap::{Parser, Subcommand};

use crate::search::Difficulty;

/// Chessmate - chess sessions against the engine, locally, or online
#[derive(Parser, Debug)]
#[command(name = "chessmate")]
#[command(about = "Chess engine, sessions, and online play", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the game server other players connect to
    Serve {
        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Play a game in the terminal
    Play {
        /// Display name; also the key your games and stats are stored under
        #[arg(short, long, default_value = "Player")]
        name: String,

        /// Opponent: the engine, a second player at this terminal, or online
        #[arg(short, long, default_value = "ai")]
        mode: PlayMode,

        /// Engine strength for ai mode
        #[arg(short, long, default_value = "medium")]
        difficulty: Difficulty,

        /// Game server URL for online mode
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server_url: String,

        /// Join an existing room by code instead of hosting one
        #[arg(long)]
        room: Option<String>,

        /// Path to the database file (created if it doesn't exist)
        #[arg(long, default_value = "chessmate.db")]
        db_path: String,
    },

    /// Show win/loss/draw statistics for a player
    Stats {
        /// Display name to report on
        #[arg(short, long, default_value = "Player")]
        name: String,

        /// Path to the database file
        #[arg(long, default_value = "chessmate.db")]
        db_path: String,
    },
}

/// Who sits across the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PlayMode {
    /// Against the engine.
    Ai,
    /// Two players sharing this terminal.
    Local,
    /// Against a remote player through the game server.
    Online,
}
