use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{PuzzleId, SetId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PuzzleSetError {
    #[error("puzzle set must contain at least one puzzle")]
    Empty,

    #[error("puzzle set must be repeated at least once")]
    InvalidRepeats,

    #[error("puzzle {0} appears more than once in the set")]
    DuplicatePuzzle(PuzzleId),

    #[error("too many puzzles for a single set: {0}")]
    TooLarge(usize),

    #[error("progress ({repeat_index}, {puzzle_index}) is outside {repeats} repeats of {size} puzzles")]
    ProgressOutOfRange {
        repeat_index: u32,
        puzzle_index: u32,
        repeats: u32,
        size: u32,
    },
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Durable position inside a set: which cycle and which puzzle of that cycle.
///
/// The pair is always written together. Ordering is lexicographic, so a
/// larger value is further along the drill.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SetProgress {
    pub repeat_index: u32,
    pub puzzle_index: u32,
}

impl SetProgress {
    #[must_use]
    pub fn new(repeat_index: u32, puzzle_index: u32) -> Self {
        Self {
            repeat_index,
            puzzle_index,
        }
    }
}

/// Result of moving past the current puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Next puzzle within the same cycle.
    NextPuzzle(SetProgress),
    /// Last puzzle of a cycle finished; the next cycle starts at puzzle 0.
    NextRepeat(SetProgress),
    /// Last puzzle of the last cycle finished; the set is now complete.
    Finished(SetProgress),
    /// The set was already complete; nothing changed.
    AlreadyComplete,
}

impl Advance {
    /// Progress that must be persisted for this transition, if any.
    #[must_use]
    pub fn progress(&self) -> Option<SetProgress> {
        match self {
            Advance::NextPuzzle(p) | Advance::NextRepeat(p) | Advance::Finished(p) => Some(*p),
            Advance::AlreadyComplete => None,
        }
    }

    /// True when the set is complete after this transition.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Advance::Finished(_) | Advance::AlreadyComplete)
    }
}

//
// ─── PUZZLE SET ────────────────────────────────────────────────────────────────
//

/// Request to persist a freshly composed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPuzzleSet {
    pub target_rating: u32,
    pub repeats: u32,
    pub puzzle_ids: Vec<PuzzleId>,
}

impl NewPuzzleSet {
    /// Check the ids and repeat count before anything is persisted.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError` for empty or duplicated ids or zero repeats.
    pub fn validate(&self) -> Result<u32, PuzzleSetError> {
        validate_ids(&self.puzzle_ids, self.repeats)
    }
}

/// A fixed collection of puzzles drilled for `repeats` cycles.
///
/// `size` always equals `puzzle_ids.len()`; the only mutable state is the
/// `(repeat_index, puzzle_index)` progress pair, which only moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleSet {
    id: SetId,
    target_rating: u32,
    repeats: u32,
    puzzle_ids: Vec<PuzzleId>,
    progress: SetProgress,
    created_at: DateTime<Utc>,
}

impl PuzzleSet {
    /// Create a set at the very beginning of its first cycle.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError` if the request is invalid.
    pub fn new(id: SetId, new: NewPuzzleSet, created_at: DateTime<Utc>) -> Result<Self, PuzzleSetError> {
        Self::from_persisted(
            id,
            new.target_rating,
            new.repeats,
            new.puzzle_ids,
            SetProgress::default(),
            created_at,
        )
    }

    /// Rehydrate a set from storage.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError` if ids are empty/duplicated or progress is out of range.
    pub fn from_persisted(
        id: SetId,
        target_rating: u32,
        repeats: u32,
        puzzle_ids: Vec<PuzzleId>,
        progress: SetProgress,
        created_at: DateTime<Utc>,
    ) -> Result<Self, PuzzleSetError> {
        let size = validate_ids(&puzzle_ids, repeats)?;
        check_progress(progress, size, repeats)?;

        let mut set = Self {
            id,
            target_rating,
            repeats,
            puzzle_ids,
            progress,
            created_at,
        };
        set.normalize();
        Ok(set)
    }

    #[must_use]
    pub fn id(&self) -> SetId {
        self.id
    }

    #[must_use]
    pub fn target_rating(&self) -> u32 {
        self.target_rating
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        // validated in the constructors
        u32::try_from(self.puzzle_ids.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    #[must_use]
    pub fn puzzle_ids(&self) -> &[PuzzleId] {
        &self.puzzle_ids
    }

    #[must_use]
    pub fn progress(&self) -> SetProgress {
        self.progress
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress.repeat_index >= self.repeats
    }

    /// Id of the puzzle to solve next, `None` once the set is complete.
    #[must_use]
    pub fn current_puzzle_id(&self) -> Option<&PuzzleId> {
        if self.is_complete() {
            return None;
        }
        let index = usize::try_from(self.progress.puzzle_index).ok()?;
        self.puzzle_ids.get(index)
    }

    /// Compute the transition that finishing the current puzzle would make.
    #[must_use]
    pub fn peek_advance(&self) -> Advance {
        if self.is_complete() {
            return Advance::AlreadyComplete;
        }
        let SetProgress {
            repeat_index,
            puzzle_index,
        } = self.progress;

        if puzzle_index + 1 < self.size() {
            return Advance::NextPuzzle(SetProgress::new(repeat_index, puzzle_index + 1));
        }

        let next = SetProgress::new(repeat_index + 1, 0);
        if next.repeat_index >= self.repeats {
            Advance::Finished(next)
        } else {
            Advance::NextRepeat(next)
        }
    }

    /// Move past the current puzzle.
    ///
    /// Calling this on a complete set is a no-op that returns
    /// `Advance::AlreadyComplete`.
    pub fn advance(&mut self) -> Advance {
        let advance = self.peek_advance();
        if let Some(progress) = advance.progress() {
            self.progress = progress;
        }
        advance
    }

    /// Merge progress read from the store with the progress held in memory.
    ///
    /// Progress never moves backwards, so the further of the two wins. Returns
    /// `true` when the in-memory value is ahead of the stored one, meaning the
    /// store missed a write and should be updated.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError::ProgressOutOfRange` if the stored pair does not
    /// fit this set; the in-memory progress is left untouched.
    pub fn reconcile(&mut self, stored: SetProgress) -> Result<bool, PuzzleSetError> {
        check_progress(stored, self.size(), self.repeats)?;
        let local = self.progress;
        self.progress = local.max(stored);
        self.normalize();
        Ok(self.progress > stored)
    }

    // `puzzle_index == size` can only come from storage; treat it as the start
    // of the next cycle.
    fn normalize(&mut self) {
        if !self.is_complete() && self.progress.puzzle_index >= self.size() {
            self.progress = SetProgress::new(self.progress.repeat_index + 1, 0);
        }
    }
}

fn validate_ids(ids: &[PuzzleId], repeats: u32) -> Result<u32, PuzzleSetError> {
    if ids.is_empty() {
        return Err(PuzzleSetError::Empty);
    }
    if repeats == 0 {
        return Err(PuzzleSetError::InvalidRepeats);
    }
    let size = u32::try_from(ids.len()).map_err(|_| PuzzleSetError::TooLarge(ids.len()))?;
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(PuzzleSetError::DuplicatePuzzle(id.clone()));
        }
    }
    Ok(size)
}

fn check_progress(progress: SetProgress, size: u32, repeats: u32) -> Result<(), PuzzleSetError> {
    if progress.repeat_index > repeats || progress.puzzle_index > size {
        return Err(PuzzleSetError::ProgressOutOfRange {
            repeat_index: progress.repeat_index,
            puzzle_index: progress.puzzle_index,
            repeats,
            size,
        });
    }
    Ok(())
}
