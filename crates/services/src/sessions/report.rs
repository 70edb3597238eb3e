use chrono::{DateTime, Utc};
use std::sync::Arc;

use storage::repository::{AccuracyStore, SetStore, StorageError};
use woodpecker_core::model::{AccuracyRecord, PuzzleSet, SetId, SetProgress};

/// Score of one cycle through a set.
///
/// Plain numbers only; formatting is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub repeat_index: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub time_taken_secs: u64,
    pub accuracy_percent: Option<f64>,
}

impl From<&AccuracyRecord> for CycleReport {
    fn from(record: &AccuracyRecord) -> Self {
        Self {
            repeat_index: record.repeat_index,
            correct: record.correct,
            incorrect: record.incorrect,
            time_taken_secs: record.time_taken_secs,
            accuracy_percent: record.accuracy_percent(),
        }
    }
}

/// Per-cycle accuracy plus where the set stands.
#[derive(Debug, Clone, PartialEq)]
pub struct SetReport {
    pub set_id: SetId,
    pub target_rating: u32,
    pub size: u32,
    pub repeats: u32,
    pub progress: SetProgress,
    pub is_complete: bool,
    pub cycles: Vec<CycleReport>,
}

/// List item for a stored set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOverview {
    pub set_id: SetId,
    pub target_rating: u32,
    pub size: u32,
    pub repeats: u32,
    pub progress: SetProgress,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&PuzzleSet> for SetOverview {
    fn from(set: &PuzzleSet) -> Self {
        Self {
            set_id: set.id(),
            target_rating: set.target_rating(),
            size: set.size(),
            repeats: set.repeats(),
            progress: set.progress(),
            is_complete: set.is_complete(),
            created_at: set.created_at(),
        }
    }
}

/// Read-only queries over sets and their accuracy rows.
#[derive(Clone)]
pub struct AccuracyService {
    sets: Arc<dyn SetStore>,
    accuracy: Arc<dyn AccuracyStore>,
}

impl AccuracyService {
    #[must_use]
    pub fn new(sets: Arc<dyn SetStore>, accuracy: Arc<dyn AccuracyStore>) -> Self {
        Self { sets, accuracy }
    }

    /// Build the report for one set.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the set does not exist.
    pub async fn report(&self, set_id: SetId) -> Result<SetReport, StorageError> {
        let set = self.sets.get_set(set_id).await?;
        let rows = self.accuracy.list_accuracy(set_id).await?;
        Ok(SetReport {
            set_id,
            target_rating: set.target_rating(),
            size: set.size(),
            repeats: set.repeats(),
            progress: set.progress(),
            is_complete: set.is_complete(),
            cycles: rows.iter().map(CycleReport::from).collect(),
        })
    }

    /// Most recent sets first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    pub async fn list_sets(&self, limit: u32) -> Result<Vec<SetOverview>, StorageError> {
        let sets = self.sets.list_sets(limit).await?;
        Ok(sets.iter().map(SetOverview::from).collect())
    }
}
