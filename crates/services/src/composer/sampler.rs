use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use storage::repository::{CatalogError, PuzzleCatalog};
use woodpecker_core::model::{DifficultyBand, PuzzleId};

/// Draws puzzles for the composer one band at a time.
#[async_trait]
pub trait BandSampler: Send {
    /// Bands the composer may choose from.
    fn bands(&self) -> Vec<DifficultyBand>;

    /// Draw one puzzle id from `band`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Exhausted` when the band has nothing left to
    /// offer, or any other catalog failure.
    async fn draw(&mut self, band: DifficultyBand) -> Result<PuzzleId, CatalogError>;
}

/// Production sampler over a `PuzzleCatalog`.
///
/// Ids already handed out are excluded from later draws, so a catalog never
/// returns the same puzzle twice to one composition.
pub struct CatalogBandSampler {
    catalog: Arc<dyn PuzzleCatalog>,
    bands: Vec<DifficultyBand>,
    handed_out: HashSet<PuzzleId>,
}

impl CatalogBandSampler {
    #[must_use]
    pub fn new(catalog: Arc<dyn PuzzleCatalog>) -> Self {
        Self::with_bands(catalog, DifficultyBand::ALL.to_vec())
    }

    #[must_use]
    pub fn with_bands(catalog: Arc<dyn PuzzleCatalog>, bands: Vec<DifficultyBand>) -> Self {
        Self {
            catalog,
            bands,
            handed_out: HashSet::new(),
        }
    }
}

#[async_trait]
impl BandSampler for CatalogBandSampler {
    fn bands(&self) -> Vec<DifficultyBand> {
        self.bands.clone()
    }

    async fn draw(&mut self, band: DifficultyBand) -> Result<PuzzleId, CatalogError> {
        let puzzle = self.catalog.get_by_band(band, &self.handed_out).await?;
        let id = puzzle.id().clone();
        self.handed_out.insert(id.clone());
        Ok(id)
    }
}
