//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::{CatalogError, StorageError};
use storage::sqlite::SqliteInitError;
use woodpecker_core::model::{MoveParseError, PuzzleId, PuzzleSetError};

/// Errors emitted by `SetComposer`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComposeError {
    #[error("composer drew no puzzles for target rating {target_rating}")]
    Empty { target_rating: u32 },
    #[error("only {drawn} of {requested} puzzles could be drawn")]
    Incomplete { drawn: usize, requested: usize },
    #[error(transparent)]
    PuzzleSet(#[from] PuzzleSetError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the session engine and training loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("set is already complete")]
    SetComplete,
    #[error("no puzzle is loaded")]
    NoPuzzleLoaded,
    #[error("puzzle is still being played out")]
    Locked,
    #[error("puzzle is not finished yet")]
    PuzzleUnfinished,
    #[error("loaded puzzle {loaded} does not match the set's current puzzle {expected}")]
    PuzzleMismatch { expected: PuzzleId, loaded: PuzzleId },
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error(transparent)]
    Move(#[from] MoveParseError),
    #[error(transparent)]
    PuzzleSet(#[from] PuzzleSetError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
