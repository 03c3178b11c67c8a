//! Chessmate library - chess sessions with an engine opponent and online play
//!
//! # Architecture
//!
//! - **Rules**: legality, SAN, and terminal detection over a board
//! - **Search**: move selection at three strengths, up to alpha-beta minimax
//! - **Session**: one game's state machine with clocks and a move record
//! - **Runtime**: an async task serializing ticks, moves, and engine replies
//! - **Sync**: reconciliation against an authoritative remote store
//! - **Server**: the REST surface remote players meet in
//! - **Db**: sqlite persistence for profiles, saved games, and statistics
//!
//! # Example
//!
//! ```no_run
//! use chessmate::{GameSession, Player, Side};
//!
//! let mut session = GameSession::start_ai(Player::new("u1", "Alice"));
//! session.apply_san("e4")?;
//! assert_eq!(session.active_side(), Side::Black);
//! # Ok::<(), chessmate::SessionError>(())
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// The rules crate appears in the public API (boards, moves), so expose it.
pub use chess;

// Private module declarations
mod cli;
mod clock;
mod db;
mod notation;
mod remote;
mod rules;
mod runtime;
mod search;
mod server;
mod session;
mod sync;
mod types;

// Crate-level exports - CLI
pub use cli::{Cli, Command, PlayMode};

// Crate-level exports - Clocks
pub use clock::{ClockPair, DEFAULT_TIME_SECONDS, TickResult};

// Crate-level exports - Persistence
pub use db::{
    AggregatedStats, DbError, GameOutcome, GameRepository, GameStat, MIGRATIONS, NewGameStat,
    NewSavedGame, NewUser, SavedGame, User,
};

// Crate-level exports - Notation
pub use notation::{GameMeta, NotationError, export, movetext, parse_san, san};

// Crate-level exports - Remote client
pub use remote::RestRemoteStore;

// Crate-level exports - Rules engine
pub use rules::{MoveOutcome, Position, RulesError, TerminalKind};

// Crate-level exports - Session runtime
pub use runtime::{
    ENGINE_DELAY, Persistence, RuntimeConfig, RuntimeError, SessionEvent, SessionHandle,
    SessionRuntime,
};

// Crate-level exports - Search
pub use search::{Difficulty, MATE_SCORE, SEARCH_DEPTH, evaluate, select_move};

// Crate-level exports - Server
pub use server::{CreateRoomRequest, GameDocument, JoinRoomRequest, PollQuery, router, serve};

// Crate-level exports - Sessions
pub use session::{AppliedMove, GameSession, GameSnapshot, Player, SessionError, SessionId};

// Crate-level exports - Remote sync
pub use sync::{
    GameUpdate, MemoryRemoteStore, RemoteStore, Room, RoomStatus, SyncAdapter, SyncError,
};

// Crate-level exports - Core types
pub use types::{GameMode, GameResult, GameStatus, Side};
