mod accuracy;
mod band;
mod ids;
pub mod moves;
mod puzzle;
mod puzzle_set;

pub use accuracy::{AccuracyDelta, AccuracyRecord};
pub use band::{BandParseError, DifficultyBand};
pub use ids::{ParseIdError, PuzzleId, SetId};
pub use moves::MoveParseError;
pub use puzzle::{PuzzleError, PuzzleRecord};
pub use puzzle_set::{Advance, NewPuzzleSet, PuzzleSet, PuzzleSetError, SetProgress};
