//! Thin wrapper around the rules engine (the `chess` crate).
//!
//! The session layer owns exactly one [`Position`] and mutates it only through
//! this module. Legality, check detection, and terminal status all come from
//! the rules engine; nothing here re-implements board law.

use chess::{Board, ChessMove, Game as ChessGame, GameResult as ChessOutcome, MoveGen, Piece, Square};
use derive_getters::Getters;
use derive_more::{Display, Error, From};
use std::str::FromStr;
use tracing::{debug, instrument, warn};

use crate::notation::{self, NotationError};
use crate::Side;

/// Error surfaced by the rules wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum RulesError {
    /// Move rejected by the rules engine. Recoverable: the position is
    /// unchanged and the caller may re-prompt.
    #[display("illegal move {mv}")]
    IllegalMove {
        /// The rejected move in coordinate form.
        #[error(not(source))]
        mv: ChessMove,
    },
    /// A mutating call arrived after the game ended.
    #[display("position is terminal")]
    GameOver,
    /// Square or SAN text failed to parse.
    #[from]
    Notation(NotationError),
}

/// How a terminal position ended, as reported by the rules engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// Checkmate delivered by the given side.
    Checkmate(Side),
    /// Side to move has no legal moves but is not in check.
    Stalemate,
    /// Drawn by rule (repetition or fifty-move).
    DrawOther,
}

/// What happened when a move was applied.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct MoveOutcome {
    /// The move in short algebraic notation.
    san: String,
    /// Whether a piece (or pawn, en passant included) was captured.
    capture: bool,
    /// Whether the opponent is now in check.
    check: bool,
}

/// The single board position owned by a game session.
///
/// Replaced wholesale when a persisted or remote game is loaded; otherwise
/// mutated only through [`Position::apply`].
#[derive(Debug, Clone)]
pub struct Position {
    game: ChessGame,
}

impl Position {
    /// Starts from the standard initial position.
    pub fn new() -> Self {
        Self {
            game: ChessGame::new(),
        }
    }

    /// Rebuilds a position by replaying a SAN move record from the initial
    /// position. This is the sync-rebuild path: the remote move list is
    /// authoritative and is never merged field-by-field.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError`] if any entry fails to parse or apply.
    #[instrument(skip(moves), fields(count = moves.len()))]
    pub fn from_moves(moves: &[String]) -> Result<Self, RulesError> {
        let mut position = Self::new();
        for san in moves {
            position.apply_san(san)?;
        }
        debug!(plies = moves.len(), "Position rebuilt from move record");
        Ok(position)
    }

    /// The side whose turn it is.
    pub fn side_to_move(&self) -> Side {
        self.game.side_to_move().into()
    }

    /// Cheap copy of the current board, for the search engine. The search
    /// recurses over copies and can never disturb the session's position.
    pub fn board(&self) -> Board {
        self.game.current_position()
    }

    /// All legal moves in the current position.
    pub fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.game.current_position()).collect()
    }

    /// Legal destination squares for the piece on `from`, if any.
    pub fn legal_targets(&self, from: Square) -> Vec<Square> {
        MoveGen::new_legal(&self.game.current_position())
            .filter(|mv| mv.get_source() == from)
            .map(|mv| mv.get_dest())
            .collect()
    }

    /// Parses coordinate input (`"e2"`, `"e4"`, optional promotion letter)
    /// into a move. Legality is checked by [`Position::apply`], not here.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Notation`] if a square or promotion letter is
    /// malformed.
    pub fn decode(
        &self,
        from: &str,
        to: &str,
        promotion: Option<char>,
    ) -> Result<ChessMove, RulesError> {
        let source = Square::from_str(from)
            .map_err(|_| NotationError::InvalidSquare(from.to_string()))?;
        let dest =
            Square::from_str(to).map_err(|_| NotationError::InvalidSquare(to.to_string()))?;
        let promo = promotion
            .map(|c| match c.to_ascii_lowercase() {
                'q' => Ok(Piece::Queen),
                'r' => Ok(Piece::Rook),
                'b' => Ok(Piece::Bishop),
                'n' => Ok(Piece::Knight),
                other => Err(NotationError::InvalidSan(other.to_string())),
            })
            .transpose()?;
        Ok(ChessMove::new(source, dest, promo))
    }

    /// Applies a move, returning its SAN text and capture/check flags.
    ///
    /// On rejection the position is left untouched.
    ///
    /// # Errors
    ///
    /// [`RulesError::GameOver`] if the position is already terminal,
    /// [`RulesError::IllegalMove`] if the rules engine rejects the move.
    #[instrument(skip(self), fields(side = %self.side_to_move()))]
    pub fn apply(&mut self, mv: ChessMove) -> Result<MoveOutcome, RulesError> {
        if self.game.result().is_some() {
            warn!(%mv, "Move submitted to a terminal position");
            return Err(RulesError::GameOver);
        }

        let board = self.game.current_position();
        if !board.legal(mv) {
            debug!(%mv, "Rules engine rejected move");
            return Err(RulesError::IllegalMove { mv });
        }

        let san = notation::san(&board, mv);
        let moved = board.piece_on(mv.get_source());
        let capture = board.piece_on(mv.get_dest()).is_some()
            || (moved == Some(Piece::Pawn)
                && mv.get_source().get_file() != mv.get_dest().get_file());

        // legal() passed, so make_move cannot refuse.
        self.game.make_move(mv);

        // Repetition and fifty-move draws surface through the rules engine
        // as declarable; declare eagerly so terminal() reports them.
        if self.game.can_declare_draw() {
            debug!("Declarable draw reached, declaring");
            self.game.declare_draw();
        }

        let check = self.game.current_position().checkers().popcnt() > 0;
        debug!(%san, capture, check, "Move applied");
        Ok(MoveOutcome { san, capture, check })
    }

    /// Parses and applies a SAN move.
    ///
    /// # Errors
    ///
    /// [`RulesError::GameOver`] if the position is already terminal,
    /// otherwise parse failures and [`Position::apply`] rejections.
    pub fn apply_san(&mut self, san: &str) -> Result<MoveOutcome, RulesError> {
        // Terminal before parse: on a finished game even a well-formed SAN
        // has no legal interpretation, and the caller should see the
        // game-over rejection rather than a parse error.
        if self.game.result().is_some() {
            warn!(san, "Move submitted to a terminal position");
            return Err(RulesError::GameOver);
        }
        let mv = notation::parse_san(&self.game.current_position(), san)?;
        self.apply(mv)
    }

    /// Terminal status of the position, or `None` while the game is live.
    pub fn terminal(&self) -> Option<TerminalKind> {
        self.game.result().map(|outcome| match outcome {
            ChessOutcome::WhiteCheckmates => TerminalKind::Checkmate(Side::White),
            ChessOutcome::BlackCheckmates => TerminalKind::Checkmate(Side::Black),
            ChessOutcome::Stalemate => TerminalKind::Stalemate,
            ChessOutcome::DrawAccepted | ChessOutcome::DrawDeclared => TerminalKind::DrawOther,
            // Resignation is a session-level event in this crate; the
            // underlying game never records one.
            ChessOutcome::WhiteResigns | ChessOutcome::BlackResigns => TerminalKind::DrawOther,
        })
    }

    /// Whether the position is terminal.
    pub fn is_over(&self) -> bool {
        self.terminal().is_some()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}
