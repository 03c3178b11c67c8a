//! Short algebraic notation and movetext export.
//!
//! Encoding is done against the position a move is played *from*, using the
//! legal-move set for disambiguation. Decoding delegates to the rules engine's
//! own SAN parser. Movetext export regenerates a standard transcript from the
//! move record and four metadata fields alone.

use chess::{Board, BoardStatus, ChessMove, MoveGen, Piece};
use chrono::NaiveDate;
use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_new::new;

use crate::GameResult;

/// Notation parsing error.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum NotationError {
    /// Text is not a legal SAN move in the given position.
    #[display("unparseable SAN '{_0}'")]
    InvalidSan(#[error(not(source))] String),
    /// Text is not a board square.
    #[display("invalid square '{_0}'")]
    InvalidSquare(#[error(not(source))] String),
}

/// Encodes a legal move as SAN for the position it is played from.
///
/// Falls back to coordinate text if the move does not originate from an
/// occupied square (callers are expected to pass legal moves only).
pub fn san(board: &Board, mv: ChessMove) -> String {
    let Some(piece) = board.piece_on(mv.get_source()) else {
        return mv.to_string();
    };

    let dest = mv.get_dest();
    let capture = board.piece_on(dest).is_some()
        || (piece == Piece::Pawn && mv.get_source().get_file() != dest.get_file());

    let body = if piece == Piece::King && file_distance(mv) == 2 {
        if dest.get_file().to_index() > mv.get_source().get_file().to_index() {
            "O-O".to_string()
        } else {
            "O-O-O".to_string()
        }
    } else if piece == Piece::Pawn {
        let mut s = String::new();
        if capture {
            s.push(file_char(mv.get_source()));
            s.push('x');
        }
        s.push_str(&dest.to_string());
        if let Some(promo) = mv.get_promotion() {
            s.push('=');
            s.push(piece_letter(promo));
        }
        s
    } else {
        let mut s = String::new();
        s.push(piece_letter(piece));
        s.push_str(&disambiguation(board, mv, piece));
        if capture {
            s.push('x');
        }
        s.push_str(&dest.to_string());
        s
    };

    format!("{}{}", body, suffix(board, mv))
}

/// Decodes SAN text into a move for the given position.
///
/// # Errors
///
/// Returns [`NotationError::InvalidSan`] if the text is not a legal move.
pub fn parse_san(board: &Board, text: &str) -> Result<ChessMove, NotationError> {
    let stripped = text
        .trim()
        .trim_end_matches(['+', '#', '!', '?'])
        .replace('0', "O");
    ChessMove::from_san(board, &stripped).map_err(|_| NotationError::InvalidSan(text.to_string()))
}

/// Metadata needed to export a transcript: date, player names, result.
#[derive(Debug, Clone, PartialEq, Eq, Getters, new)]
pub struct GameMeta {
    /// Date the game was played.
    date: NaiveDate,
    /// White player's display name.
    white: String,
    /// Black player's display name.
    black: String,
    /// Final result, or `None` for an unfinished game.
    result: Option<GameResult>,
}

/// Renders numbered move pairs terminated by the result marker.
pub fn movetext(moves: &[String], result: Option<GameResult>) -> String {
    let mut out = String::new();
    for (number, pair) in moves.chunks(2).enumerate() {
        out.push_str(&format!("{}. {}", number + 1, pair[0]));
        if let Some(black) = pair.get(1) {
            out.push(' ');
            out.push_str(black);
        }
        out.push(' ');
    }
    out.push_str(result.map(GameResult::marker).unwrap_or("*"));
    out
}

/// Exports a full transcript: tag pairs for the four metadata fields, then
/// movetext.
pub fn export(meta: &GameMeta, moves: &[String]) -> String {
    format!(
        "[Date \"{}\"]\n[White \"{}\"]\n[Black \"{}\"]\n[Result \"{}\"]\n\n{}\n",
        meta.date().format("%Y.%m.%d"),
        meta.white(),
        meta.black(),
        meta.result().map(GameResult::marker).unwrap_or("*"),
        movetext(moves, *meta.result()),
    )
}

fn file_distance(mv: ChessMove) -> usize {
    mv.get_source()
        .get_file()
        .to_index()
        .abs_diff(mv.get_dest().get_file().to_index())
}

fn file_char(square: chess::Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_char(square: chess::Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
        Piece::Pawn => 'P',
    }
}

/// File, rank, or full-square disambiguator when another piece of the same
/// kind can also reach the destination.
fn disambiguation(board: &Board, mv: ChessMove, piece: Piece) -> String {
    let rivals: Vec<ChessMove> = MoveGen::new_legal(board)
        .filter(|other| {
            other.get_source() != mv.get_source()
                && other.get_dest() == mv.get_dest()
                && board.piece_on(other.get_source()) == Some(piece)
        })
        .collect();

    if rivals.is_empty() {
        return String::new();
    }

    let file = mv.get_source().get_file();
    let rank = mv.get_source().get_rank();
    if rivals.iter().all(|m| m.get_source().get_file() != file) {
        file_char(mv.get_source()).to_string()
    } else if rivals.iter().all(|m| m.get_source().get_rank() != rank) {
        rank_char(mv.get_source()).to_string()
    } else {
        mv.get_source().to_string()
    }
}

fn suffix(board: &Board, mv: ChessMove) -> &'static str {
    let after = board.make_move_new(mv);
    match after.status() {
        BoardStatus::Checkmate => "#",
        _ if after.checkers().popcnt() > 0 => "+",
        _ => "",
    }
}
