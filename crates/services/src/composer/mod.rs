//! Rating-balanced set composition.
//!
//! Each draw looks at the running average of the representative ratings
//! drawn so far: at or above the target it draws from a band below the
//! target, otherwise from a band at or above it. The average therefore
//! oscillates around the target and settles as the set grows.

mod sampler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use storage::repository::{CatalogError, PuzzleCatalog, SetStore};
use woodpecker_core::Clock;
use woodpecker_core::model::{DifficultyBand, NewPuzzleSet, PuzzleId, PuzzleSet};

use crate::error::ComposeError;

pub use sampler::{BandSampler, CatalogBandSampler};

/// Consecutive duplicate draws after which a band is treated as exhausted.
pub const MAX_DUPLICATE_RETRIES: u32 = 16;

//
// ─── OUTCOME ───────────────────────────────────────────────────────────────────
//

/// Result of a composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// Exactly the requested number of puzzles.
    FullSet(Vec<PuzzleId>),
    /// One side of the target ran out of bands before `requested` was reached.
    PartialSet {
        ids: Vec<PuzzleId>,
        requested: usize,
    },
}

impl ComposeOutcome {
    #[must_use]
    pub fn ids(&self) -> &[PuzzleId] {
        match self {
            ComposeOutcome::FullSet(ids) | ComposeOutcome::PartialSet { ids, .. } => ids,
        }
    }

    #[must_use]
    pub fn into_ids(self) -> Vec<PuzzleId> {
        match self {
            ComposeOutcome::FullSet(ids) | ComposeOutcome::PartialSet { ids, .. } => ids,
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, ComposeOutcome::FullSet(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Persist a `PartialSet` instead of failing with `ComposeError::Incomplete`.
    pub allow_partial: bool,
}

/// Parameters of a new set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeRequest {
    pub target_rating: u32,
    pub size: usize,
    pub repeats: u32,
}

/// A persisted set together with how much of the request it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedSet {
    pub set: PuzzleSet,
    pub requested: usize,
}

impl ComposedSet {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        usize::try_from(self.set.size()).map_or(true, |size| size < self.requested)
    }
}

//
// ─── COMPOSER ──────────────────────────────────────────────────────────────────
//

#[derive(Clone)]
pub struct SetComposer {
    clock: Clock,
    catalog: Arc<dyn PuzzleCatalog>,
    sets: Arc<dyn SetStore>,
    max_size: usize,
}

impl SetComposer {
    #[must_use]
    pub fn new(
        clock: Clock,
        catalog: Arc<dyn PuzzleCatalog>,
        sets: Arc<dyn SetStore>,
        max_size: usize,
    ) -> Self {
        Self {
            clock,
            catalog,
            sets,
            max_size: max_size.max(1),
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Compose an ordered list of distinct puzzle ids around `target_rating`.
    ///
    /// `size` is clamped to `[1, max_size]`.
    ///
    /// # Errors
    ///
    /// Returns `ComposeError::Catalog` if the sampler fails with anything
    /// other than band exhaustion.
    pub async fn compose<S>(
        &self,
        target_rating: u32,
        size: usize,
        sampler: &mut S,
    ) -> Result<ComposeOutcome, ComposeError>
    where
        S: BandSampler + ?Sized,
    {
        let mut rng = StdRng::seed_from_u64(rand::random());
        self.compose_with_rng(target_rating, size, sampler, &mut rng)
            .await
    }

    /// Same as [`SetComposer::compose`] with a caller-provided RNG.
    ///
    /// # Errors
    ///
    /// See [`SetComposer::compose`].
    pub async fn compose_with_rng<S, R>(
        &self,
        target_rating: u32,
        size: usize,
        sampler: &mut S,
        rng: &mut R,
    ) -> Result<ComposeOutcome, ComposeError>
    where
        S: BandSampler + ?Sized,
        R: Rng + Send + ?Sized,
    {
        let requested = size.clamp(1, self.max_size);
        let target = u64::from(target_rating);

        let mut bands = sampler.bands();
        bands.sort();
        bands.dedup();

        let mut ids: Vec<PuzzleId> = Vec::with_capacity(requested);
        let mut seen: HashSet<PuzzleId> = HashSet::with_capacity(requested);
        let mut duplicate_streak: HashMap<DifficultyBand, u32> = HashMap::new();
        let mut rating_sum: u64 = 0;

        while ids.len() < requested {
            let average = match u64::try_from(ids.len()) {
                Ok(0) | Err(_) => 0,
                Ok(count) => rating_sum / count,
            };
            let side: Vec<DifficultyBand> = bands
                .iter()
                .copied()
                .filter(|band| {
                    let below = u64::from(band.representative_rating()) < target;
                    if average >= target { below } else { !below }
                })
                .collect();
            let Some(&band) = side.choose(rng) else {
                log::debug!(
                    "no bands left {} target {target_rating}; stopping at {} of {requested}",
                    if average >= target { "below" } else { "above" },
                    ids.len()
                );
                break;
            };

            match sampler.draw(band).await {
                Ok(id) => {
                    if seen.insert(id.clone()) {
                        duplicate_streak.remove(&band);
                        rating_sum += u64::from(band.representative_rating());
                        ids.push(id);
                    } else {
                        let streak = duplicate_streak.entry(band).or_insert(0);
                        *streak += 1;
                        if *streak >= MAX_DUPLICATE_RETRIES {
                            log::debug!("band {band} keeps repeating puzzles; dropping it");
                            bands.retain(|b| *b != band);
                        }
                    }
                }
                Err(CatalogError::Exhausted(_)) => {
                    log::debug!("band {band} exhausted");
                    bands.retain(|b| *b != band);
                }
                Err(err) => return Err(ComposeError::Catalog(err)),
            }
        }

        ids.shuffle(rng);
        if ids.len() == requested {
            Ok(ComposeOutcome::FullSet(ids))
        } else {
            Ok(ComposeOutcome::PartialSet { ids, requested })
        }
    }

    /// Compose from the catalog and persist the result as a new set.
    ///
    /// # Errors
    ///
    /// Returns `ComposeError::Empty` if nothing could be drawn,
    /// `ComposeError::Incomplete` for a partial set unless
    /// `options.allow_partial`, and catalog or storage errors otherwise.
    pub async fn compose_and_create(
        &self,
        request: ComposeRequest,
        options: ComposeOptions,
    ) -> Result<ComposedSet, ComposeError> {
        let mut sampler = CatalogBandSampler::new(Arc::clone(&self.catalog));
        let outcome = self
            .compose(request.target_rating, request.size, &mut sampler)
            .await?;

        let requested = match &outcome {
            ComposeOutcome::FullSet(ids) => ids.len(),
            ComposeOutcome::PartialSet { ids, requested } => {
                if ids.is_empty() {
                    return Err(ComposeError::Empty {
                        target_rating: request.target_rating,
                    });
                }
                if !options.allow_partial {
                    return Err(ComposeError::Incomplete {
                        drawn: ids.len(),
                        requested: *requested,
                    });
                }
                *requested
            }
        };

        let new_set = NewPuzzleSet {
            target_rating: request.target_rating,
            repeats: request.repeats,
            puzzle_ids: outcome.into_ids(),
        };
        new_set.validate()?;

        let set_id = self.sets.create_set(new_set, self.clock.now()).await?;
        let set = self.sets.get_set(set_id).await?;
        log::info!(
            "created set {set_id} with {} puzzles around {} ({} repeats)",
            set.size(),
            request.target_rating,
            set.repeats()
        );
        Ok(ComposedSet { set, requested })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use storage::repository::{InMemoryRepository, StorageError};
    use woodpecker_core::time::fixed_clock;

    /// Sampler with an unlimited supply of fresh ids in the configured bands.
    struct EndlessSampler {
        bands: Vec<DifficultyBand>,
        next: u64,
        drawn: Vec<DifficultyBand>,
    }

    impl EndlessSampler {
        fn new(bands: &[DifficultyBand]) -> Self {
            Self {
                bands: bands.to_vec(),
                next: 0,
                drawn: Vec::new(),
            }
        }

        fn average(&self) -> f64 {
            let sum: f64 = self
                .drawn
                .iter()
                .map(|b| f64::from(b.representative_rating()))
                .sum();
            sum / self.drawn.len() as f64
        }
    }

    #[async_trait]
    impl BandSampler for EndlessSampler {
        fn bands(&self) -> Vec<DifficultyBand> {
            self.bands.clone()
        }

        async fn draw(&mut self, band: DifficultyBand) -> Result<PuzzleId, CatalogError> {
            self.next += 1;
            self.drawn.push(band);
            Ok(PuzzleId::new(format!("{band}-{}", self.next)).unwrap())
        }
    }

    /// Sampler that always hands back the same id.
    struct StuckSampler;

    #[async_trait]
    impl BandSampler for StuckSampler {
        fn bands(&self) -> Vec<DifficultyBand> {
            vec![DifficultyBand::Casual, DifficultyBand::Expert]
        }

        async fn draw(&mut self, _band: DifficultyBand) -> Result<PuzzleId, CatalogError> {
            Ok(PuzzleId::new("same").unwrap())
        }
    }

    struct BrokenSampler;

    #[async_trait]
    impl BandSampler for BrokenSampler {
        fn bands(&self) -> Vec<DifficultyBand> {
            DifficultyBand::ALL.to_vec()
        }

        async fn draw(&mut self, _band: DifficultyBand) -> Result<PuzzleId, CatalogError> {
            Err(CatalogError::Storage(StorageError::Connection("down".into())))
        }
    }

    fn composer(max_size: usize) -> (SetComposer, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        let composer = SetComposer::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            max_size,
        );
        (composer, repo)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[tokio::test]
    async fn full_set_has_requested_size_and_no_duplicates() {
        let (composer, _) = composer(500);
        let mut sampler = EndlessSampler::new(&DifficultyBand::ALL);
        let outcome = composer
            .compose_with_rng(1500, 40, &mut sampler, &mut rng())
            .await
            .unwrap();

        assert!(outcome.is_full());
        let ids = outcome.ids();
        assert_eq!(ids.len(), 40);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn average_converges_toward_target() {
        let (composer, _) = composer(500);
        let mut sampler = EndlessSampler::new(&DifficultyBand::ALL);
        composer
            .compose_with_rng(1500, 400, &mut sampler, &mut rng())
            .await
            .unwrap();

        // every draw crosses back toward the target, so the running sum of
        // offsets stays within the widest band offset (1100 for 1500)
        let drift = (sampler.average() - 1500.0).abs();
        assert!(drift <= 1100.0 / 400.0, "drift {drift}");
    }

    #[tokio::test]
    async fn size_is_clamped_to_bounds() {
        let (composer, _) = composer(5);
        let mut sampler = EndlessSampler::new(&DifficultyBand::ALL);
        let outcome = composer
            .compose_with_rng(1500, 50, &mut sampler, &mut rng())
            .await
            .unwrap();
        assert_eq!(outcome.ids().len(), 5);

        let mut sampler = EndlessSampler::new(&DifficultyBand::ALL);
        let outcome = composer
            .compose_with_rng(1500, 0, &mut sampler, &mut rng())
            .await
            .unwrap();
        assert_eq!(outcome.ids().len(), 1);
    }

    #[tokio::test]
    async fn target_above_every_band_yields_partial_set() {
        let (composer, _) = composer(500);
        let mut sampler = EndlessSampler::new(&DifficultyBand::ALL);
        let outcome = composer
            .compose_with_rng(3000, 10, &mut sampler, &mut rng())
            .await
            .unwrap();

        // the first draw needs a band at or above 3000, and there is none
        match outcome {
            ComposeOutcome::PartialSet { ids, requested } => {
                assert!(ids.is_empty());
                assert_eq!(requested, 10);
            }
            ComposeOutcome::FullSet(_) => panic!("expected a partial set"),
        }
    }

    #[tokio::test]
    async fn one_sided_bands_stop_after_first_draw() {
        let (composer, _) = composer(500);
        let mut sampler = EndlessSampler::new(&[DifficultyBand::Expert, DifficultyBand::Master]);
        let outcome = composer
            .compose_with_rng(1000, 10, &mut sampler, &mut rng())
            .await
            .unwrap();

        // after one draw the average sits above the target and nothing is below
        assert_eq!(outcome.ids().len(), 1);
        assert!(!outcome.is_full());
    }

    #[tokio::test]
    async fn repeated_duplicates_drop_the_band() {
        let (composer, _) = composer(500);
        let outcome = composer
            .compose_with_rng(1500, 3, &mut StuckSampler, &mut rng())
            .await
            .unwrap();
        assert_eq!(outcome.ids().len(), 1);
    }

    #[tokio::test]
    async fn catalog_failure_aborts() {
        let (composer, _) = composer(500);
        let err = composer
            .compose_with_rng(1500, 3, &mut BrokenSampler, &mut rng())
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Catalog(CatalogError::Storage(_))));
    }

    async fn seed(repo: &InMemoryRepository, count: usize) {
        const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        for band in DifficultyBand::ALL {
            for i in 0..count {
                let id = PuzzleId::new(format!("{band}{i}")).unwrap();
                let puzzle = woodpecker_core::model::PuzzleRecord::from_uci_line(
                    id,
                    START,
                    "e2e4",
                    band.representative_rating(),
                )
                .unwrap();
                repo.upsert_puzzle(&puzzle).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn compose_and_create_persists_full_set() {
        let (composer, repo) = composer(500);
        seed(&repo, 5).await;

        let created = composer
            .compose_and_create(
                ComposeRequest {
                    target_rating: 1500,
                    size: 6,
                    repeats: 3,
                },
                ComposeOptions::default(),
            )
            .await
            .unwrap();
        assert!(!created.is_partial());
        assert_eq!(created.set.size(), 6);
        assert_eq!(created.set.repeats(), 3);

        let stored = repo.get_set(created.set.id()).await.unwrap();
        assert_eq!(stored.puzzle_ids(), created.set.puzzle_ids());
    }

    #[tokio::test]
    async fn partial_sets_need_opt_in() {
        let (composer, repo) = composer(500);
        seed(&repo, 1).await;
        let request = ComposeRequest {
            target_rating: 1500,
            size: 20,
            repeats: 1,
        };

        let err = composer
            .compose_and_create(request, ComposeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Incomplete { requested: 20, .. }));
        assert!(repo.list_sets(10).await.unwrap().is_empty());

        let created = composer
            .compose_and_create(request, ComposeOptions { allow_partial: true })
            .await
            .unwrap();
        assert!(created.is_partial());
        assert!(created.set.size() >= 1);
    }
}
