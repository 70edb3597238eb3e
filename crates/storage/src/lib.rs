#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    AccuracyStore, CatalogError, InMemoryRepository, ProgressSnapshot, ProgressStore,
    PuzzleCatalog, SetStore, Storage, StorageError,
};
