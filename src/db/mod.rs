//! Sqlite persistence for user profiles, saved games, and game statistics.

mod error;
mod models;
mod repository;
mod schema; // Diesel generated schema - internal use only

pub use error::DbError;
pub use models::{
    AggregatedStats, GameOutcome, GameStat, NewGameStat, NewSavedGame, NewUser, SavedGame, User,
};
pub use repository::{GameRepository, MIGRATIONS};
