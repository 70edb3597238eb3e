use std::str::FromStr;

use chess::{Board, ChessMove, Color};
use thiserror::Error;

use crate::model::band::DifficultyBand;
use crate::model::ids::PuzzleId;
use crate::model::moves::{self, MoveParseError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PuzzleError {
    #[error("invalid starting position {fen:?}: {reason}")]
    InvalidPosition { fen: String, reason: String },

    #[error("puzzle solution is empty")]
    EmptySolution,

    #[error("lichess puzzle needs an opening move plus a solution, got {0} moves")]
    MissingLeadMove(usize),

    #[error(transparent)]
    Move(#[from] MoveParseError),

    #[error("solution ply {ply} ({uci}) is illegal in the reached position")]
    IllegalPly { ply: usize, uci: String },
}

//
// ─── PUZZLE RECORD ─────────────────────────────────────────────────────────────
//

/// A sourced tactics puzzle.
///
/// `solution` alternates between the solver and the scripted opponent,
/// starting with the solver: even plies are expected from the user, odd plies
/// are played automatically. Construction replays the whole line through the
/// rules engine, so a `PuzzleRecord` is always playable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleRecord {
    id: PuzzleId,
    starting_position: String,
    start: Board,
    solution: Vec<ChessMove>,
    rating: u32,
}

impl PuzzleRecord {
    /// Build a puzzle from a FEN position and its solution line.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleError` if the FEN does not parse, the solution is empty,
    /// or any ply is illegal in the position it is played from.
    pub fn new(
        id: PuzzleId,
        starting_position: impl Into<String>,
        solution: Vec<ChessMove>,
        rating: u32,
    ) -> Result<Self, PuzzleError> {
        let starting_position = starting_position.into();
        let start = parse_fen(&starting_position)?;
        if solution.is_empty() {
            return Err(PuzzleError::EmptySolution);
        }
        moves::play_line(start, &solution).map_err(|ply| PuzzleError::IllegalPly {
            ply,
            uci: moves::to_uci(solution[ply]),
        })?;

        Ok(Self {
            id,
            starting_position,
            start,
            solution,
            rating,
        })
    }

    /// Build a puzzle from a FEN and a space-separated UCI solution line.
    ///
    /// # Errors
    ///
    /// See [`PuzzleRecord::new`]; malformed tokens surface as `PuzzleError::Move`.
    pub fn from_uci_line(
        id: PuzzleId,
        starting_position: impl Into<String>,
        solution: &str,
        rating: u32,
    ) -> Result<Self, PuzzleError> {
        let solution = moves::parse_line(solution)?;
        Self::new(id, starting_position, solution, rating)
    }

    /// Build a puzzle from a Lichess puzzle database row.
    ///
    /// Lichess positions are given *before* the opponent's blunder, and the
    /// first move of the line is that blunder. It is applied here so the stored
    /// position is the one the solver actually faces.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleError::MissingLeadMove` when the line has fewer than two
    /// moves, plus everything [`PuzzleRecord::new`] can return.
    pub fn from_lichess(
        id: PuzzleId,
        fen: &str,
        line: &str,
        rating: u32,
    ) -> Result<Self, PuzzleError> {
        let mut line = moves::parse_line(line)?;
        if line.len() < 2 {
            return Err(PuzzleError::MissingLeadMove(line.len()));
        }
        let board = parse_fen(fen)?;
        let lead = line.remove(0);
        if !board.legal(lead) {
            return Err(PuzzleError::IllegalPly {
                ply: 0,
                uci: moves::to_uci(lead),
            });
        }
        let start = board.make_move_new(lead);
        Self::new(id, start.to_string(), line, rating)
    }

    #[must_use]
    pub fn id(&self) -> &PuzzleId {
        &self.id
    }

    /// FEN of the position the solver faces.
    #[must_use]
    pub fn starting_position(&self) -> &str {
        &self.starting_position
    }

    #[must_use]
    pub fn starting_board(&self) -> Board {
        self.start
    }

    #[must_use]
    pub fn solution(&self) -> &[ChessMove] {
        &self.solution
    }

    /// Solution rendered as a UCI line, the storage representation.
    #[must_use]
    pub fn solution_uci(&self) -> String {
        moves::line_to_uci(&self.solution)
    }

    #[must_use]
    pub fn rating(&self) -> u32 {
        self.rating
    }

    #[must_use]
    pub fn band(&self) -> DifficultyBand {
        DifficultyBand::for_rating(self.rating)
    }

    /// Side the user plays.
    #[must_use]
    pub fn solver_color(&self) -> Color {
        self.start.side_to_move()
    }

    /// Number of moves the user has to find.
    #[must_use]
    pub fn solver_moves(&self) -> usize {
        self.solution.len().div_ceil(2)
    }
}

fn parse_fen(fen: &str) -> Result<Board, PuzzleError> {
    Board::from_str(fen).map_err(|e| PuzzleError::InvalidPosition {
        fen: fen.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn pid(s: &str) -> PuzzleId {
        PuzzleId::new(s).unwrap()
    }

    #[test]
    fn builds_from_uci_line() {
        let puzzle = PuzzleRecord::from_uci_line(pid("p1"), START, "e2e4 e7e5 g1f3", 1500).unwrap();
        assert_eq!(puzzle.solution().len(), 3);
        assert_eq!(puzzle.solver_moves(), 2);
        assert_eq!(puzzle.solver_color(), Color::White);
        assert_eq!(puzzle.band(), DifficultyBand::Intermediate);
        assert_eq!(puzzle.solution_uci(), "e2e4 e7e5 g1f3");
    }

    #[test]
    fn rejects_empty_solution() {
        let err = PuzzleRecord::from_uci_line(pid("p1"), START, "  ", 1500).unwrap_err();
        assert_eq!(err, PuzzleError::EmptySolution);
    }

    #[test]
    fn rejects_bad_fen() {
        let err = PuzzleRecord::from_uci_line(pid("p1"), "not a fen", "e2e4", 1500).unwrap_err();
        assert!(matches!(err, PuzzleError::InvalidPosition { .. }));
    }

    #[test]
    fn rejects_illegal_ply_with_index() {
        let err = PuzzleRecord::from_uci_line(pid("p1"), START, "e2e4 e2e4", 1500).unwrap_err();
        assert_eq!(
            err,
            PuzzleError::IllegalPly {
                ply: 1,
                uci: "e2e4".into()
            }
        );
    }

    #[test]
    fn lichess_rows_apply_the_lead_move() {
        let puzzle =
            PuzzleRecord::from_lichess(pid("lc1"), START, "e2e4 e7e5 g1f3 b8c6", 1200).unwrap();
        assert_eq!(puzzle.solver_color(), Color::Black);
        assert_eq!(puzzle.solution_uci(), "e7e5 g1f3 b8c6");
    }

    #[test]
    fn lichess_rows_need_two_moves() {
        let err = PuzzleRecord::from_lichess(pid("lc1"), START, "e2e4", 1200).unwrap_err();
        assert_eq!(err, PuzzleError::MissingLeadMove(1));
    }
}
