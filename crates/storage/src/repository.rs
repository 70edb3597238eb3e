use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use woodpecker_core::model::{
    AccuracyDelta, AccuracyRecord, DifficultyBand, NewPuzzleSet, PuzzleId, PuzzleRecord,
    PuzzleSet, SetId, SetProgress,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by puzzle catalog lookups.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("puzzle not found: {0}")]
    NotFound(PuzzleId),

    #[error("no unused puzzles left in band {0}")]
    Exhausted(DifficultyBand),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Progress of a set as read from the store, with the bounds it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub progress: SetProgress,
    pub size: u32,
    pub repeats: u32,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn from_set(set: &PuzzleSet) -> Self {
        Self {
            progress: set.progress(),
            size: set.size(),
            repeats: set.repeats(),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress.repeat_index >= self.repeats
    }
}

/// Source of puzzle records.
#[async_trait]
pub trait PuzzleCatalog: Send + Sync {
    /// Fetch a puzzle by id.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the id is unknown, or a storage error.
    async fn get_by_id(&self, id: &PuzzleId) -> Result<PuzzleRecord, CatalogError>;

    /// Fetch a random puzzle from `band` whose id is not in `exclude`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Exhausted` if every puzzle in the band is excluded.
    async fn get_by_band(
        &self,
        band: DifficultyBand,
        exclude: &HashSet<PuzzleId>,
    ) -> Result<PuzzleRecord, CatalogError>;

    /// Persist or update a puzzle.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the puzzle cannot be stored.
    async fn upsert_puzzle(&self, puzzle: &PuzzleRecord) -> Result<(), StorageError>;

    /// Number of puzzles available in a band.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_by_band(&self, band: DifficultyBand) -> Result<u64, StorageError>;
}

/// Repository contract for puzzle sets.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Persist a new set at progress `(0, 0)` and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the request is invalid, or other storage errors.
    async fn create_set(
        &self,
        set: NewPuzzleSet,
        created_at: DateTime<Utc>,
    ) -> Result<SetId, StorageError>;

    /// Fetch a set, including its current progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_set(&self, id: SetId) -> Result<PuzzleSet, StorageError>;

    /// List sets, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_sets(&self, limit: u32) -> Result<Vec<PuzzleSet>, StorageError>;
}

/// Durable `(repeat_index, puzzle_index)` per set.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Read the stored progress of a set.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the set does not exist.
    async fn get_progress(&self, set_id: SetId) -> Result<ProgressSnapshot, StorageError>;

    /// Overwrite the stored progress pair (last write wins).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the set does not exist, or
    /// `StorageError::Conflict` if the pair is outside the set's bounds.
    async fn set_progress(&self, set_id: SetId, progress: SetProgress) -> Result<(), StorageError>;
}

/// Per-cycle accuracy rows.
#[async_trait]
pub trait AccuracyStore: Send + Sync {
    /// Add `delta` to the `(set_id, repeat_index)` row, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the set does not exist.
    async fn increment(
        &self,
        set_id: SetId,
        repeat_index: u32,
        delta: AccuracyDelta,
    ) -> Result<AccuracyRecord, StorageError>;

    /// All accuracy rows of a set ordered by repeat index.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_accuracy(&self, set_id: SetId) -> Result<Vec<AccuracyRecord>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    puzzles: Arc<Mutex<BTreeMap<PuzzleId, PuzzleRecord>>>,
    sets: Arc<Mutex<BTreeMap<SetId, PuzzleSet>>>,
    // pairs as written; `sets` holds the normalized view
    progress: Arc<Mutex<HashMap<SetId, SetProgress>>>,
    accuracy: Arc<Mutex<HashMap<(SetId, u32), AccuracyRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: ToString>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl PuzzleCatalog for InMemoryRepository {
    async fn get_by_id(&self, id: &PuzzleId) -> Result<PuzzleRecord, CatalogError> {
        let guard = self.puzzles.lock().map_err(poisoned)?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.clone()))
    }

    async fn get_by_band(
        &self,
        band: DifficultyBand,
        exclude: &HashSet<PuzzleId>,
    ) -> Result<PuzzleRecord, CatalogError> {
        let guard = self.puzzles.lock().map_err(poisoned)?;
        let candidates: Vec<&PuzzleRecord> = guard
            .values()
            .filter(|p| p.band() == band && !exclude.contains(p.id()))
            .collect();
        candidates
            .choose(&mut rand::rng())
            .map(|p| (*p).clone())
            .ok_or(CatalogError::Exhausted(band))
    }

    async fn upsert_puzzle(&self, puzzle: &PuzzleRecord) -> Result<(), StorageError> {
        let mut guard = self.puzzles.lock().map_err(poisoned)?;
        guard.insert(puzzle.id().clone(), puzzle.clone());
        Ok(())
    }

    async fn count_by_band(&self, band: DifficultyBand) -> Result<u64, StorageError> {
        let guard = self.puzzles.lock().map_err(poisoned)?;
        let count = guard.values().filter(|p| p.band() == band).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl SetStore for InMemoryRepository {
    async fn create_set(
        &self,
        set: NewPuzzleSet,
        created_at: DateTime<Utc>,
    ) -> Result<SetId, StorageError> {
        let mut guard = self.sets.lock().map_err(poisoned)?;
        let next = guard.keys().next_back().map_or(1, |id| id.value() + 1);
        let id = SetId::new(next);
        let set = PuzzleSet::new(id, set, created_at)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.insert(id, set);
        Ok(id)
    }

    async fn get_set(&self, id: SetId) -> Result<PuzzleSet, StorageError> {
        let guard = self.sets.lock().map_err(poisoned)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_sets(&self, limit: u32) -> Result<Vec<PuzzleSet>, StorageError> {
        let guard = self.sets.lock().map_err(poisoned)?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(guard.values().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl ProgressStore for InMemoryRepository {
    async fn get_progress(&self, set_id: SetId) -> Result<ProgressSnapshot, StorageError> {
        let guard = self.sets.lock().map_err(poisoned)?;
        let mut snapshot = guard
            .get(&set_id)
            .map(ProgressSnapshot::from_set)
            .ok_or(StorageError::NotFound)?;
        let raw = self.progress.lock().map_err(poisoned)?;
        if let Some(progress) = raw.get(&set_id) {
            snapshot.progress = *progress;
        }
        Ok(snapshot)
    }

    async fn set_progress(&self, set_id: SetId, progress: SetProgress) -> Result<(), StorageError> {
        let mut guard = self.sets.lock().map_err(poisoned)?;
        let set = guard.get(&set_id).ok_or(StorageError::NotFound)?;
        // bounds match the sqlite CHECK constraints
        let updated = PuzzleSet::from_persisted(
            set.id(),
            set.target_rating(),
            set.repeats(),
            set.puzzle_ids().to_vec(),
            progress,
            set.created_at(),
        )
        .map_err(|_| StorageError::Conflict)?;
        guard.insert(set_id, updated);
        self.progress
            .lock()
            .map_err(poisoned)?
            .insert(set_id, progress);
        Ok(())
    }
}

#[async_trait]
impl AccuracyStore for InMemoryRepository {
    async fn increment(
        &self,
        set_id: SetId,
        repeat_index: u32,
        delta: AccuracyDelta,
    ) -> Result<AccuracyRecord, StorageError> {
        {
            let sets = self.sets.lock().map_err(poisoned)?;
            if !sets.contains_key(&set_id) {
                return Err(StorageError::NotFound);
            }
        }
        let mut guard = self.accuracy.lock().map_err(poisoned)?;
        let record = guard
            .entry((set_id, repeat_index))
            .or_insert_with(|| AccuracyRecord::empty(set_id, repeat_index));
        record.apply(delta);
        Ok(*record)
    }

    async fn list_accuracy(&self, set_id: SetId) -> Result<Vec<AccuracyRecord>, StorageError> {
        let guard = self.accuracy.lock().map_err(poisoned)?;
        let mut rows: Vec<AccuracyRecord> = guard
            .values()
            .filter(|r| r.set_id == set_id)
            .copied()
            .collect();
        rows.sort_by_key(|r| r.repeat_index);
        Ok(rows)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn PuzzleCatalog>,
    pub sets: Arc<dyn SetStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub accuracy: Arc<dyn AccuracyStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            catalog: Arc::new(repo.clone()),
            sets: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            accuracy: Arc::new(repo),
        }
    }
}
