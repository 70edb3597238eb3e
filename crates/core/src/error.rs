use thiserror::Error;

use crate::model::{BandParseError, MoveParseError, ParseIdError, PuzzleError, PuzzleSetError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Puzzle(#[from] PuzzleError),
    #[error(transparent)]
    PuzzleSet(#[from] PuzzleSetError),
    #[error(transparent)]
    Move(#[from] MoveParseError),
    #[error(transparent)]
    Band(#[from] BandParseError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
