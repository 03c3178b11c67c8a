//! Database models and domain types.

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use tracing::instrument;

use crate::db::{DbError, schema};
use crate::{GameResult, Side};

/// User profile database model.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::users)]
pub struct User {
    id: i32,
    display_name: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

/// Insertable user model for creating new users.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::users)]
pub struct NewUser {
    display_name: String,
}

/// Saved game row. The full snapshot travels as a JSON document so the
/// session can be rebuilt exactly; the remaining columns exist for listing
/// without deserializing.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::saved_games)]
pub struct SavedGame {
    id: i32,
    owner: String,
    session_id: String,
    document: String,
    status: String,
    result: Option<String>,
    moves_count: i32,
    saved_at: NaiveDateTime,
}

/// Insertable saved game model; upserts overwrite the columns it carries.
#[derive(Debug, Clone, Insertable, new, Getters)]
#[diesel(table_name = schema::saved_games)]
pub struct NewSavedGame {
    owner: String,
    session_id: String,
    document: String,
    status: String,
    result: Option<String>,
    moves_count: i32,
}

/// Game statistics database model.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::game_stats)]
pub struct GameStat {
    id: i32,
    owner: String,
    opponent_name: String,
    mode: String,
    outcome: String,
    played_at: NaiveDateTime,
    moves_count: i32,
    session_id: String,
}

impl GameStat {
    /// Parses the stored outcome string into a [`GameOutcome`] enum.
    #[instrument(skip(self), fields(outcome = %self.outcome))]
    pub fn parse_outcome(&self) -> Result<GameOutcome, DbError> {
        GameOutcome::from_db_string(self.outcome())
    }
}

/// Insertable game stat model for recording new game results.
#[derive(Debug, Clone, Insertable, new, Getters)]
#[diesel(table_name = schema::game_stats)]
pub struct NewGameStat {
    owner: String,
    opponent_name: String,
    mode: String,
    outcome: String,
    moves_count: i32,
    session_id: String,
}

/// Game outcome from the owning player's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameOutcome {
    /// The player won the game.
    Win,
    /// The player lost the game.
    Loss,
    /// Game ended in a draw.
    Draw,
}

impl GameOutcome {
    /// Converts outcome to the string stored in the database.
    #[instrument]
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Draw => "draw",
        }
    }

    /// Parses outcome from the string stored in the database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the string is not a valid outcome value.
    #[instrument(skip(s), fields(s = %s))]
    pub fn from_db_string(s: &str) -> Result<Self, DbError> {
        match s {
            "win" => Ok(Self::Win),
            "loss" => Ok(Self::Loss),
            "draw" => Ok(Self::Draw),
            _ => Err(DbError::new(format!("Invalid outcome: '{}'", s))),
        }
    }

    /// Orients a session result around the side the player held.
    ///
    /// Abandoned sessions have no outcome and are not counted.
    #[instrument]
    pub fn from_result(result: GameResult, owned: Side) -> Option<Self> {
        match result {
            GameResult::Draw => Some(Self::Draw),
            GameResult::WhiteWins if owned == Side::White => Some(Self::Win),
            GameResult::BlackWins if owned == Side::Black => Some(Self::Win),
            GameResult::WhiteWins | GameResult::BlackWins => Some(Self::Loss),
            GameResult::Abandoned => None,
        }
    }
}

/// Aggregated statistics for a player.
#[derive(Debug, Clone, Getters)]
pub struct AggregatedStats {
    total_games: i32,
    wins: i32,
    losses: i32,
    draws: i32,
}

impl AggregatedStats {
    /// Creates new aggregated statistics.
    #[instrument]
    pub fn new(total_games: i32, wins: i32, losses: i32, draws: i32) -> Self {
        Self {
            total_games,
            wins,
            losses,
            draws,
        }
    }

    /// Calculates win rate as a percentage (0.0-100.0).
    #[instrument(skip(self))]
    pub fn win_rate(&self) -> f64 {
        if self.total_games == 0 {
            0.0
        } else {
            (self.wins as f64 / self.total_games as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_orients_around_owned_side() {
        assert_eq!(
            GameOutcome::from_result(GameResult::WhiteWins, Side::White),
            Some(GameOutcome::Win)
        );
        assert_eq!(
            GameOutcome::from_result(GameResult::WhiteWins, Side::Black),
            Some(GameOutcome::Loss)
        );
        assert_eq!(
            GameOutcome::from_result(GameResult::Draw, Side::Black),
            Some(GameOutcome::Draw)
        );
        assert_eq!(GameOutcome::from_result(GameResult::Abandoned, Side::White), None);
    }

    #[test]
    fn outcome_db_strings_round_trip() {
        for outcome in [GameOutcome::Win, GameOutcome::Loss, GameOutcome::Draw] {
            let parsed = GameOutcome::from_db_string(outcome.to_db_string());
            assert_eq!(parsed.unwrap(), outcome);
        }
        assert!(GameOutcome::from_db_string("rage-quit").is_err());
    }

    #[test]
    fn win_rate_handles_empty_history() {
        assert_eq!(AggregatedStats::new(0, 0, 0, 0).win_rate(), 0.0);
        assert_eq!(AggregatedStats::new(4, 3, 1, 0).win_rate(), 75.0);
    }
}
