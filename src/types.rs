//! Core domain types shared across the session, search, and sync layers.

use serde::{Deserialize, Serialize};

/// A side of the board.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    /// White (moves first).
    White,
    /// Black (moves second).
    Black,
}

impl Side {
    /// Returns the opposing side.
    pub fn opponent(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// The side that wins when this side loses on time, resigns, or is mated.
    pub fn winner_against(self) -> crate::GameResult {
        match self {
            Side::White => crate::GameResult::BlackWins,
            Side::Black => crate::GameResult::WhiteWins,
        }
    }
}

impl From<chess::Color> for Side {
    fn from(color: chess::Color) -> Self {
        match color {
            chess::Color::White => Side::White,
            chess::Color::Black => Side::Black,
        }
    }
}

impl From<Side> for chess::Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => chess::Color::White,
            Side::Black => chess::Color::Black,
        }
    }
}

/// How a session is played.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GameMode {
    /// Two humans sharing one device.
    Local,
    /// Human against the built-in engine.
    Ai,
    /// Two humans over the remote store.
    Online,
}

/// Lifecycle state of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GameStatus {
    /// Online session pending an opponent.
    Waiting,
    /// Game in progress; moves and ticks are accepted.
    Active,
    /// Game over with a result set.
    Finished,
    /// Session discarded before reaching a result.
    Abandoned,
}

impl GameStatus {
    /// Whether this status accepts further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::Abandoned)
    }
}

/// Final outcome of a finished session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GameResult {
    /// White won by mate, timeout, or black resignation.
    WhiteWins,
    /// Black won by mate, timeout, or white resignation.
    BlackWins,
    /// Drawn by stalemate, agreement, or rule.
    Draw,
    /// Session abandoned without a result.
    Abandoned,
}

impl GameResult {
    /// Standard movetext result marker.
    pub fn marker(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
            GameResult::Abandoned => "*",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opponent_round_trips() {
        assert_eq!(Side::White.opponent(), Side::Black);
        assert_eq!(Side::Black.opponent().opponent(), Side::Black);
    }

    #[test]
    fn result_markers() {
        assert_eq!(GameResult::WhiteWins.marker(), "1-0");
        assert_eq!(GameResult::Draw.marker(), "1/2-1/2");
        assert_eq!(GameResult::Abandoned.marker(), "*");
    }

    #[test]
    fn serde_uses_kebab_case_results() {
        let json = serde_json::to_string(&GameResult::BlackWins).unwrap();
        assert_eq!(json, "\"black-wins\"");
    }
}
