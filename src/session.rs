//! Game session state machine.
//!
//! A [`GameSession`] owns one position, the append-only move record, the
//! clock pair, and the status/result lifecycle:
//! `waiting -> active -> {finished, abandoned}`. All mutation here is
//! synchronous and single-threaded; the async runtime in [`crate::runtime`]
//! serializes ticks, moves, and remote snapshots onto one session.

use chess::ChessMove;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{ClockPair, TickResult};
use crate::notation::{self, GameMeta};
use crate::rules::{MoveOutcome, Position, RulesError, TerminalKind};
use crate::{GameMode, GameResult, GameStatus, Side};

/// Unique identifier for a game session.
pub type SessionId = Uuid;

/// A participant in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable identifier (account id, or a generated id for guests and the
    /// engine).
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Player {
    /// Creates a player record.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The built-in engine opponent.
    pub fn engine() -> Self {
        Self::new("engine", "Engine")
    }
}

/// Error surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum SessionError {
    /// A mutating operation reached a finished or abandoned session.
    /// Rejected, never silently ignored.
    #[display("session is {status}")]
    Terminal {
        /// The terminal status the session is in.
        #[error(not(source))]
        status: GameStatus,
    },
    /// The operation requires an active session (e.g. a move while an online
    /// session is still waiting for its opponent).
    #[display("session is {status}, not active")]
    NotActive {
        /// The current non-active status.
        #[error(not(source))]
        status: GameStatus,
    },
    /// The session is not waiting for an opponent.
    #[display("session is not waiting for an opponent")]
    NotWaiting,
    /// The rules engine rejected the move (recoverable; no state changed).
    #[from]
    Rules(RulesError),
}

/// An accepted move: the rules outcome plus the result if it ended the game.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct AppliedMove {
    /// SAN text and capture/check flags from the rules engine.
    outcome: MoveOutcome,
    /// Set when this move finished the game.
    result: Option<GameResult>,
}

/// Serializable copy of a session's full state.
///
/// This is both the persistence document and the remote store's authoritative
/// snapshot; a session can be rebuilt from it by replaying `moves`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct GameSnapshot {
    /// Session id.
    id: SessionId,
    /// How the session is played.
    mode: GameMode,
    /// Lifecycle status.
    status: GameStatus,
    /// Side to move.
    active_side: Side,
    /// Append-only SAN move record, one entry per ply.
    moves: Vec<String>,
    /// Final result, if finished.
    result: Option<GameResult>,
    /// Remaining time for both sides.
    clocks: ClockPair,
    /// White player, if seated.
    white: Option<Player>,
    /// Black player, if seated.
    black: Option<Player>,
    /// Creation time.
    created_at: DateTime<Utc>,
    /// Completion time, if finished or abandoned.
    ended_at: Option<DateTime<Utc>>,
}

impl GameSnapshot {
    /// Copy of this snapshot with the guest seated and the session
    /// activated. Used by the remote store when a room code is consumed.
    pub fn with_guest(mut self, guest: Player) -> Self {
        self.black = Some(guest);
        self.status = GameStatus::Active;
        self
    }

    /// Folds the move-bearing fields of a partial update into this snapshot.
    /// Identity, players, clocks, and creation time survive.
    pub(crate) fn apply_update(
        &mut self,
        moves: Vec<String>,
        active_side: Side,
        status: GameStatus,
        result: Option<GameResult>,
        ended_at: Option<DateTime<Utc>>,
    ) {
        self.moves = moves;
        self.active_side = active_side;
        self.status = status;
        self.result = result;
        self.ended_at = ended_at;
    }
}

/// The session state machine.
#[derive(Debug, Clone)]
pub struct GameSession {
    id: SessionId,
    mode: GameMode,
    status: GameStatus,
    position: Position,
    moves: Vec<String>,
    clocks: ClockPair,
    result: Option<GameResult>,
    white: Option<Player>,
    black: Option<Player>,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    /// Starts a session: fresh position, empty move record, full clocks.
    ///
    /// `local` and `ai` sessions begin active. An `online` session begins
    /// waiting until its guest arrives via [`GameSession::seat_guest`].
    #[instrument(skip(white, black))]
    pub fn start(mode: GameMode, white: Player, black: Option<Player>) -> Self {
        let status = match (mode, &black) {
            (GameMode::Online, None) => GameStatus::Waiting,
            _ => GameStatus::Active,
        };
        let session = Self {
            id: Uuid::new_v4(),
            mode,
            status,
            position: Position::new(),
            moves: Vec::new(),
            clocks: ClockPair::default(),
            result: None,
            white: Some(white),
            black,
            created_at: Utc::now(),
            ended_at: None,
        };
        info!(session_id = %session.id, %mode, status = %session.status, "Session started");
        session
    }

    /// Starts a human-vs-engine session with the human as white.
    pub fn start_ai(human: Player) -> Self {
        Self::start(GameMode::Ai, human, Some(Player::engine()))
    }

    /// Seats the guest in a waiting online session and activates it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotWaiting`] unless the session is waiting.
    #[instrument(skip(self, guest), fields(session_id = %self.id))]
    pub fn seat_guest(&mut self, guest: Player) -> Result<(), SessionError> {
        if self.status != GameStatus::Waiting {
            warn!(status = %self.status, "Guest join on a non-waiting session");
            return Err(SessionError::NotWaiting);
        }
        info!(guest_id = %guest.id, "Guest seated, session active");
        self.black = Some(guest);
        self.status = GameStatus::Active;
        Ok(())
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Game mode.
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Lifecycle status.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Final result, if finished.
    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    /// The side to move. Always consistent with the move record's parity:
    /// an even number of plies means white to move.
    pub fn active_side(&self) -> Side {
        self.position.side_to_move()
    }

    /// The append-only move record.
    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    /// Remaining time for both sides.
    pub fn clocks(&self) -> ClockPair {
        self.clocks
    }

    /// The session's position (read access for move hints and the search).
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Whether the session has reached a terminal status.
    pub fn is_over(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.status {
            GameStatus::Active => Ok(()),
            GameStatus::Finished | GameStatus::Abandoned => Err(SessionError::Terminal {
                status: self.status,
            }),
            GameStatus::Waiting => Err(SessionError::NotActive {
                status: self.status,
            }),
        }
    }

    /// Applies a move, appending its SAN to the record and flipping the
    /// active side. If the rules engine reports a terminal position, the
    /// session finishes and the computed result is returned in
    /// [`AppliedMove::result`].
    ///
    /// # Errors
    ///
    /// Typed rejection, with no state change, when the session is not active
    /// or the rules engine refuses the move.
    #[instrument(skip(self), fields(session_id = %self.id, ply = self.moves.len()))]
    pub fn apply_move(&mut self, mv: ChessMove) -> Result<AppliedMove, SessionError> {
        self.ensure_active()?;
        let outcome = self.position.apply(mv)?;
        self.moves.push(outcome.san().clone());
        debug!(san = %outcome.san(), plies = self.moves.len(), "Move recorded");

        let result = self.position.terminal().map(|kind| {
            let result = match kind {
                TerminalKind::Checkmate(winner) => winner.opponent().winner_against(),
                TerminalKind::Stalemate | TerminalKind::DrawOther => GameResult::Draw,
            };
            self.finish(result);
            result
        });

        Ok(AppliedMove { outcome, result })
    }

    /// Parses coordinate input and applies it as a move.
    ///
    /// # Errors
    ///
    /// As [`GameSession::apply_move`], plus square parse failures.
    pub fn apply_coords(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<char>,
    ) -> Result<AppliedMove, SessionError> {
        let mv = self.position.decode(from, to, promotion)?;
        self.apply_move(mv)
    }

    /// Parses SAN text and applies it as a move.
    ///
    /// # Errors
    ///
    /// As [`GameSession::apply_move`], plus SAN parse failures.
    pub fn apply_san(&mut self, san: &str) -> Result<AppliedMove, SessionError> {
        self.ensure_active()?;
        let mv =
            notation::parse_san(&self.position.board(), san).map_err(RulesError::Notation)?;
        self.apply_move(mv)
    }

    /// Advances the active side's clock by one second. No-op unless the
    /// session is active. Returns the result if the flag fell and finished
    /// the game.
    pub fn tick(&mut self) -> Option<GameResult> {
        if self.status != GameStatus::Active {
            return None;
        }
        let side = self.active_side();
        match self.clocks.tick(side) {
            TickResult::Running => None,
            TickResult::FlagFall => {
                info!(session_id = %self.id, flagged = %side, "Flag fell");
                let result = side.winner_against();
                self.finish(result);
                Some(result)
            }
        }
    }

    /// The given side resigns; the opponent wins.
    ///
    /// # Errors
    ///
    /// Rejected unless the session is active.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn resign(&mut self, side: Side) -> Result<GameResult, SessionError> {
        self.ensure_active()?;
        let result = side.winner_against();
        info!(resigned = %side, "Resignation");
        self.finish(result);
        Ok(result)
    }

    /// Offers a draw. Offers are auto-accepted (no negotiation), so this
    /// finishes the session as drawn.
    ///
    /// # Errors
    ///
    /// Rejected unless the session is active.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn offer_draw(&mut self) -> Result<GameResult, SessionError> {
        self.ensure_active()?;
        info!("Draw agreed");
        self.finish(GameResult::Draw);
        Ok(GameResult::Draw)
    }

    /// Accepts an outstanding draw offer. Identical to [`offer_draw`] under
    /// the auto-accept behavior.
    ///
    /// [`offer_draw`]: GameSession::offer_draw
    ///
    /// # Errors
    ///
    /// Rejected unless the session is active.
    pub fn accept_draw(&mut self) -> Result<GameResult, SessionError> {
        self.offer_draw()
    }

    /// Finishes the session by timeout of the given side.
    ///
    /// Normally driven internally by [`GameSession::tick`]; exposed for
    /// remote snapshots that report a flag the local clock has not seen.
    ///
    /// # Errors
    ///
    /// Rejected unless the session is active.
    pub fn timeout(&mut self, side: Side) -> Result<GameResult, SessionError> {
        self.ensure_active()?;
        let result = side.winner_against();
        info!(session_id = %self.id, flagged = %side, "Timeout");
        self.finish(result);
        Ok(result)
    }

    /// Marks the session abandoned. Used when the owner discards an
    /// unfinished session; finished sessions keep their result.
    pub fn abandon(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        info!(session_id = %self.id, "Session abandoned");
        self.status = GameStatus::Abandoned;
        self.result = Some(GameResult::Abandoned);
        self.ended_at = Some(Utc::now());
    }

    /// Replaces the clock state.
    ///
    /// Remote game documents carry creation-time clocks only; time is
    /// measured by each peer's own tick source. After a rebuild from a
    /// remote snapshot the runtime re-installs the locally measured pair.
    pub fn restore_clocks(&mut self, clocks: ClockPair) {
        self.clocks = clocks;
    }

    fn finish(&mut self, result: GameResult) {
        self.status = GameStatus::Finished;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
        info!(session_id = %self.id, %result, "Session finished");
    }

    /// Produces the serializable snapshot of this session.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            id: self.id,
            mode: self.mode,
            status: self.status,
            active_side: self.active_side(),
            moves: self.moves.clone(),
            result: self.result,
            clocks: self.clocks,
            white: self.white.clone(),
            black: self.black.clone(),
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }

    /// Rebuilds a session from a snapshot by replaying its move record
    /// through the rules engine. The snapshot is authoritative: nothing from
    /// any existing local state survives.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rules`] if the move record does not replay.
    #[instrument(skip(snapshot), fields(session_id = %snapshot.id, plies = snapshot.moves.len()))]
    pub fn from_snapshot(snapshot: GameSnapshot) -> Result<Self, SessionError> {
        let position = Position::from_moves(&snapshot.moves)?;
        debug!("Session rebuilt from snapshot");
        Ok(Self {
            id: snapshot.id,
            mode: snapshot.mode,
            status: snapshot.status,
            position,
            moves: snapshot.moves,
            clocks: snapshot.clocks,
            result: snapshot.result,
            white: snapshot.white,
            black: snapshot.black,
            created_at: snapshot.created_at,
            ended_at: snapshot.ended_at,
        })
    }

    /// Exports the movetext transcript with tag pairs for date, player
    /// names, and result.
    pub fn export(&self) -> String {
        let meta = GameMeta::new(
            self.created_at.date_naive(),
            self.white
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "White".to_string()),
            self.black
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Black".to_string()),
            self.result,
        );
        notation::export(&meta, &self.moves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_session() -> GameSession {
        GameSession::start(
            GameMode::Local,
            Player::new("w", "Alice"),
            Some(Player::new("b", "Bob")),
        )
    }

    #[test]
    fn local_session_starts_active() {
        let session = local_session();
        assert_eq!(session.status(), GameStatus::Active);
        assert_eq!(session.active_side(), Side::White);
        assert!(session.moves().is_empty());
        assert_eq!(session.clocks().white_remaining(), 600);
    }

    #[test]
    fn online_session_waits_for_guest() {
        let mut session = GameSession::start(GameMode::Online, Player::new("h", "Host"), None);
        assert_eq!(session.status(), GameStatus::Waiting);
        assert!(matches!(
            session.apply_san("e4"),
            Err(SessionError::NotActive { .. })
        ));

        session.seat_guest(Player::new("g", "Guest")).unwrap();
        assert_eq!(session.status(), GameStatus::Active);
        assert!(session.seat_guest(Player::new("x", "Late")).is_err());
    }

    #[test]
    fn accepted_move_grows_record_by_one_and_flips_side() {
        let mut session = local_session();
        let applied = session.apply_coords("e2", "e4", None).unwrap();
        assert_eq!(applied.outcome().san(), "e4");
        assert_eq!(session.moves().len(), 1);
        assert_eq!(session.active_side(), Side::Black);
    }

    #[test]
    fn full_round_restores_active_side() {
        let mut session = local_session();
        session.apply_coords("e2", "e4", None).unwrap();
        session.apply_coords("e7", "e5", None).unwrap();
        assert_eq!(session.moves().len(), 2);
        assert_eq!(session.active_side(), Side::White);
    }

    #[test]
    fn rejected_move_is_a_no_op() {
        let mut session = local_session();
        let before = session.moves().len();
        let err = session.apply_coords("e2", "e5", None);
        assert!(matches!(err, Err(SessionError::Rules(_))));
        assert_eq!(session.moves().len(), before);
        assert_eq!(session.active_side(), Side::White);
    }

    #[test]
    fn checkmate_finishes_with_winner_and_ended_at() {
        let mut session = local_session();
        for san in ["f3", "e5", "g4"] {
            session.apply_san(san).unwrap();
        }
        let applied = session.apply_san("Qh4#").unwrap();
        assert_eq!(applied.result(), &Some(GameResult::BlackWins));
        assert_eq!(session.status(), GameStatus::Finished);
        assert!(session.snapshot().ended_at().is_some());
    }

    #[test]
    fn terminal_session_rejects_everything() {
        let mut session = local_session();
        session.resign(Side::White).unwrap();
        assert!(matches!(
            session.apply_san("e4"),
            Err(SessionError::Terminal { .. })
        ));
        assert!(session.resign(Side::Black).is_err());
        assert!(session.offer_draw().is_err());
        assert_eq!(session.tick(), None);
    }

    #[test]
    fn tick_decrements_active_side_only() {
        let mut session = local_session();
        session.tick();
        assert_eq!(session.clocks().white_remaining(), 599);
        assert_eq!(session.clocks().black_remaining(), 600);
    }

    #[test]
    fn flag_fall_finishes_for_the_opponent() {
        let mut session = local_session();
        for _ in 0..599 {
            assert_eq!(session.tick(), None);
        }
        // White has one second left and is to move; the next tick flags.
        assert_eq!(session.tick(), Some(GameResult::BlackWins));
        assert_eq!(session.status(), GameStatus::Finished);
        assert_eq!(session.clocks().white_remaining(), 0);
    }

    #[test]
    fn resignation_awards_the_opponent() {
        let mut session = local_session();
        assert_eq!(session.resign(Side::Black), Ok(GameResult::WhiteWins));
    }

    #[test]
    fn draw_offer_is_auto_accepted() {
        let mut session = local_session();
        session.apply_san("e4").unwrap();
        assert_eq!(session.offer_draw(), Ok(GameResult::Draw));
        assert_eq!(session.result(), Some(GameResult::Draw));
    }

    #[test]
    fn abandon_is_idempotent_and_keeps_finished_results() {
        let mut session = local_session();
        session.resign(Side::White).unwrap();
        session.abandon();
        assert_eq!(session.status(), GameStatus::Finished);
        assert_eq!(session.result(), Some(GameResult::BlackWins));

        let mut fresh = local_session();
        fresh.abandon();
        assert_eq!(fresh.status(), GameStatus::Abandoned);
        assert_eq!(fresh.result(), Some(GameResult::Abandoned));
    }

    #[test]
    fn snapshot_round_trip_rebuilds_identical_state() {
        let mut session = local_session();
        for san in ["e4", "c5", "Nf3"] {
            session.apply_san(san).unwrap();
        }
        let snapshot = session.snapshot();
        let rebuilt = GameSession::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(rebuilt.snapshot(), snapshot);
        assert_eq!(rebuilt.position().board(), session.position().board());
    }

    #[test]
    fn export_draw_with_four_plies() {
        let mut session = local_session();
        for san in ["e4", "e5", "Nf3", "Nc6"] {
            session.apply_san(san).unwrap();
        }
        session.offer_draw().unwrap();
        let transcript = session.export();
        assert!(transcript.contains("1. e4 e5 2. Nf3 Nc6 1/2-1/2"));
        assert!(transcript.contains("[White \"Alice\"]"));
    }
}
