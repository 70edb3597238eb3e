use serde::{Deserialize, Serialize};

use crate::model::ids::SetId;

/// Increment applied to one `(set, repeat)` accuracy row.
///
/// Deltas only ever add, so they commute and may reach the store in any
/// order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyDelta {
    pub correct: u32,
    pub incorrect: u32,
    pub time_secs: u64,
}

impl AccuracyDelta {
    /// One solved puzzle that took `time_secs`.
    #[must_use]
    pub fn solved(time_secs: u64) -> Self {
        Self {
            correct: 1,
            incorrect: 0,
            time_secs,
        }
    }

    /// One failed puzzle that took `time_secs` until the wrong move.
    #[must_use]
    pub fn failed(time_secs: u64) -> Self {
        Self {
            correct: 0,
            incorrect: 1,
            time_secs,
        }
    }

    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            correct: self.correct.saturating_add(other.correct),
            incorrect: self.incorrect.saturating_add(other.incorrect),
            time_secs: self.time_secs.saturating_add(other.time_secs),
        }
    }
}

/// Score and time for one cycle through a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub set_id: SetId,
    pub repeat_index: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub time_taken_secs: u64,
}

impl AccuracyRecord {
    /// The lazily created row for a cycle that has no results yet.
    #[must_use]
    pub fn empty(set_id: SetId, repeat_index: u32) -> Self {
        Self {
            set_id,
            repeat_index,
            correct: 0,
            incorrect: 0,
            time_taken_secs: 0,
        }
    }

    pub fn apply(&mut self, delta: AccuracyDelta) {
        self.correct = self.correct.saturating_add(delta.correct);
        self.incorrect = self.incorrect.saturating_add(delta.incorrect);
        self.time_taken_secs = self.time_taken_secs.saturating_add(delta.time_secs);
    }

    #[must_use]
    pub fn attempted(&self) -> u32 {
        self.correct.saturating_add(self.incorrect)
    }

    /// Share of attempted puzzles solved, in percent. `None` before any attempt.
    #[must_use]
    pub fn accuracy_percent(&self) -> Option<f64> {
        let attempted = self.attempted();
        if attempted == 0 {
            return None;
        }
        Some(f64::from(self.correct) * 100.0 / f64::from(attempted))
    }
}
