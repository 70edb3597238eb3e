#![forbid(unsafe_code)]

pub mod app_services;
pub mod cache;
pub mod composer;
pub mod config;
pub mod error;
pub mod sessions;

pub use woodpecker_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use cache::{CachedCatalog, PuzzleCache};
pub use composer::{
    BandSampler, CatalogBandSampler, ComposeOptions, ComposeOutcome, ComposeRequest, ComposedSet,
    SetComposer,
};
pub use config::{PersistencePolicy, TrainingConfig};
pub use error::{AppServicesError, ComposeError, SessionError};

pub use sessions::{
    AccuracyService, CompletionResult, CycleReport, MoveOutcome, MoveResult, ReplayEvent,
    SessionEngine, SessionNotice, SessionPhase, SessionProgress, SessionState, SetOverview,
    SetReport, TrainingLoopService,
};
