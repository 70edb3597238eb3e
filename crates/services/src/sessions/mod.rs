mod engine;
mod progress;
mod report;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use engine::{MoveOutcome, PuzzleCompletion, SessionEngine, SessionPhase, SessionState};
pub use progress::SessionProgress;
pub use report::{AccuracyService, CycleReport, SetOverview, SetReport};
pub use workflow::{CompletionResult, MoveResult, ReplayEvent, SessionNotice, TrainingLoopService};
