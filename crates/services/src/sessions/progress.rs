use woodpecker_core::model::SetId;

use super::engine::{SessionEngine, SessionPhase};

/// Aggregated view of where a training session stands, useful for UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub set_id: SetId,
    pub phase: SessionPhase,
    pub repeat_index: u32,
    pub repeats: u32,
    pub puzzle_index: u32,
    pub size: u32,
    /// Puzzles finished over all cycles.
    pub finished: u64,
    /// Puzzles in all cycles together.
    pub total: u64,
    pub is_complete: bool,
}

impl SessionProgress {
    #[must_use]
    pub fn from_engine(engine: &SessionEngine) -> Self {
        let set = engine.set();
        let progress = set.progress();
        let size = u64::from(set.size());
        let total = size * u64::from(set.repeats());
        let finished =
            (u64::from(progress.repeat_index) * size + u64::from(progress.puzzle_index)).min(total);
        Self {
            set_id: set.id(),
            phase: engine.phase(),
            repeat_index: progress.repeat_index,
            repeats: set.repeats(),
            puzzle_index: progress.puzzle_index,
            size: set.size(),
            finished,
            total,
            is_complete: set.is_complete(),
        }
    }
}
