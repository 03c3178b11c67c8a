//! Move selection for the computer opponent.
//!
//! Pure functions over board snapshots: the caller's position is never
//! touched, because the search recurses over `Copy` boards rather than
//! applying and undoing on shared state.

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, ALL_PIECES};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Fixed lookahead for the high tier, in plies.
pub const SEARCH_DEPTH: u8 = 3;

/// Checkmate score magnitude; signed against the side to move.
pub const MATE_SCORE: i32 = 1000;

/// Strength of the computer opponent. Pure configuration, not persisted per
/// move.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Difficulty {
    /// Uniform random over the legal moves. No evaluation.
    Low,
    /// Single-ply heuristic: captures, then checks, then random.
    Medium,
    /// Depth-3 minimax with alpha-beta pruning. Deterministic.
    High,
}

/// Picks a move for the side to play in `board`.
///
/// # Panics
///
/// Panics if the position has no legal moves. That is a caller bug: move
/// selection must never be invoked on a terminal position.
#[instrument(skip(board, rng), fields(side = ?board.side_to_move()))]
pub fn select_move<R: Rng>(board: &Board, difficulty: Difficulty, rng: &mut R) -> ChessMove {
    let moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
    assert!(
        !moves.is_empty(),
        "select_move invoked on a terminal position"
    );

    let chosen = match difficulty {
        Difficulty::Low => random_move(&moves, rng),
        Difficulty::Medium => medium_move(board, &moves, rng),
        Difficulty::High => hard_move(board, &moves),
    };
    debug!(%chosen, "Engine selected move");
    chosen
}

fn random_move<R: Rng>(moves: &[ChessMove], rng: &mut R) -> ChessMove {
    *moves.choose(rng).expect("caller guarantees non-empty moves")
}

/// Prefers a capture, then a checking move, then falls back to random.
/// Ties within a category break uniformly at random.
fn medium_move<R: Rng>(board: &Board, moves: &[ChessMove], rng: &mut R) -> ChessMove {
    let captures: Vec<ChessMove> = moves
        .iter()
        .copied()
        .filter(|mv| is_capture(board, *mv))
        .collect();
    if !captures.is_empty() {
        return random_move(&captures, rng);
    }

    let checks: Vec<ChessMove> = moves
        .iter()
        .copied()
        .filter(|mv| board.make_move_new(*mv).checkers().popcnt() > 0)
        .collect();
    if !checks.is_empty() {
        return random_move(&checks, rng);
    }

    random_move(moves, rng)
}

fn is_capture(board: &Board, mv: ChessMove) -> bool {
    board.piece_on(mv.get_dest()).is_some()
        || (board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            && mv.get_source().get_file() != mv.get_dest().get_file())
}

/// Fixed-depth minimax. White maximizes, black minimizes; the first move
/// attaining the best score is kept (strict improvement only), which makes
/// the tie-break stable and the whole tier deterministic.
fn hard_move(board: &Board, moves: &[ChessMove]) -> ChessMove {
    let maximizing = board.side_to_move() == Color::White;
    let (score, best) = minimax(board, SEARCH_DEPTH, i32::MIN, i32::MAX, maximizing);
    debug!(score, depth = SEARCH_DEPTH, "Minimax complete");
    // A searched non-terminal position always yields a move; keep the
    // engine-order fallback for belt and braces.
    best.unwrap_or(moves[0])
}

fn minimax(
    board: &Board,
    depth: u8,
    mut alpha: i32,
    mut beta: i32,
    maximizing: bool,
) -> (i32, Option<ChessMove>) {
    if depth == 0 || board.status() != BoardStatus::Ongoing {
        return (evaluate(board), None);
    }

    let mut best = None;
    if maximizing {
        let mut max_score = i32::MIN;
        for mv in MoveGen::new_legal(board) {
            let (score, _) = minimax(&board.make_move_new(mv), depth - 1, alpha, beta, false);
            if score > max_score {
                max_score = score;
                best = Some(mv);
            }
            alpha = alpha.max(score);
            if beta <= alpha {
                break;
            }
        }
        (max_score, best)
    } else {
        let mut min_score = i32::MAX;
        for mv in MoveGen::new_legal(board) {
            let (score, _) = minimax(&board.make_move_new(mv), depth - 1, alpha, beta, true);
            if score < min_score {
                min_score = score;
                best = Some(mv);
            }
            beta = beta.min(score);
            if beta <= alpha {
                break;
            }
        }
        (min_score, best)
    }
}

/// Static evaluation, positive when white is favored.
///
/// Checkmate scores against the side to move (the mated side); stalemate is
/// zero; otherwise pure material count.
pub fn evaluate(board: &Board) -> i32 {
    match board.status() {
        BoardStatus::Checkmate => {
            if board.side_to_move() == Color::White {
                -MATE_SCORE
            } else {
                MATE_SCORE
            }
        }
        BoardStatus::Stalemate => 0,
        BoardStatus::Ongoing => material(board),
    }
}

fn material(board: &Board) -> i32 {
    let mut score = 0;
    for piece in ALL_PIECES {
        let white = (board.pieces(piece) & board.color_combined(Color::White)).popcnt() as i32;
        let black = (board.pieces(piece) & board.color_combined(Color::Black)).popcnt() as i32;
        score += piece_value(piece) * (white - black);
    }
    score
}

fn piece_value(piece: Piece) -> i32 {
    match piece {
        Piece::Pawn => 1,
        Piece::Knight => 3,
        Piece::Bishop => 3,
        Piece::Rook => 5,
        Piece::Queen => 9,
        Piece::King => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Position;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn board_after(moves: &[&str]) -> Board {
        let mut position = Position::new();
        for san in moves {
            position.apply_san(san).unwrap();
        }
        position.board()
    }

    #[test]
    fn low_always_returns_a_legal_move() {
        let board = Board::default();
        let legal: Vec<ChessMove> = MoveGen::new_legal(&board).collect();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mv = select_move(&board, Difficulty::Low, &mut rng);
            assert!(legal.contains(&mv));
        }
    }

    #[test]
    fn medium_prefers_the_only_capture() {
        let board = board_after(&["e4", "d5"]);
        let mut rng = StdRng::seed_from_u64(11);
        let mv = select_move(&board, Difficulty::Medium, &mut rng);
        assert!(is_capture(&board, mv));
    }

    #[test]
    fn high_is_deterministic() {
        let board = board_after(&["e4", "e5", "Nf3"]);
        let mut rng_a = StdRng::seed_from_u64(1);
        let mut rng_b = StdRng::seed_from_u64(2);
        let first = select_move(&board, Difficulty::High, &mut rng_a);
        let second = select_move(&board, Difficulty::High, &mut rng_b);
        assert_eq!(first, second);
    }

    #[test]
    fn high_finds_mate_in_one() {
        let board = board_after(&["e4", "e5", "Bc4", "Nc6", "Qh5", "Nf6"]);
        let mut rng = StdRng::seed_from_u64(3);
        let mv = select_move(&board, Difficulty::High, &mut rng);
        let after = board.make_move_new(mv);
        assert_eq!(after.status(), BoardStatus::Checkmate);
    }

    #[test]
    fn evaluation_is_zero_at_start_and_counts_material() {
        assert_eq!(evaluate(&Board::default()), 0);
        // After exd5 white is a pawn up.
        let board = board_after(&["e4", "d5", "exd5"]);
        assert_eq!(evaluate(&board), 1);
    }

    #[test]
    fn evaluation_scores_mate_against_side_to_move() {
        let board = board_after(&["f3", "e5", "g4", "Qh4#"]);
        // White to move and mated: black is favored.
        assert_eq!(evaluate(&board), -MATE_SCORE);
    }

    #[test]
    fn difficulty_parses_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(Difficulty::from_str("high").unwrap(), Difficulty::High);
        assert_eq!(Difficulty::from_str("Low").unwrap(), Difficulty::Low);
    }
}
