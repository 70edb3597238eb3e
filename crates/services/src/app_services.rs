use std::sync::Arc;

use storage::repository::{PuzzleCatalog, Storage};

use crate::Clock;
use crate::cache::CachedCatalog;
use crate::composer::SetComposer;
use crate::config::TrainingConfig;
use crate::error::AppServicesError;
use crate::sessions::{AccuracyService, TrainingLoopService};

/// Assembles app-facing services over one storage backend.
///
/// Every service shares the same cached catalog.
#[derive(Clone)]
pub struct AppServices {
    config: TrainingConfig,
    catalog: Arc<CachedCatalog>,
    composer: Arc<SetComposer>,
    training: Arc<TrainingLoopService>,
    accuracy: Arc<AccuracyService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: TrainingConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: TrainingConfig) -> Self {
        let catalog = Arc::new(CachedCatalog::with_capacity(
            Arc::clone(&storage.catalog),
            config.cache_capacity,
        ));
        let shared: Arc<dyn PuzzleCatalog> = catalog.clone();

        let composer = Arc::new(SetComposer::new(
            clock,
            Arc::clone(&shared),
            Arc::clone(&storage.sets),
            config.max_set_size,
        ));
        let training = Arc::new(TrainingLoopService::new(
            clock,
            config.clone(),
            shared,
            Arc::clone(&storage.sets),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.accuracy),
        ));
        let accuracy = Arc::new(AccuracyService::new(
            Arc::clone(&storage.sets),
            Arc::clone(&storage.accuracy),
        ));

        Self {
            config,
            catalog,
            composer,
            training,
            accuracy,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CachedCatalog> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn composer(&self) -> Arc<SetComposer> {
        Arc::clone(&self.composer)
    }

    #[must_use]
    pub fn training(&self) -> Arc<TrainingLoopService> {
        Arc::clone(&self.training)
    }

    #[must_use]
    pub fn accuracy(&self) -> Arc<AccuracyService> {
        Arc::clone(&self.accuracy)
    }
}
