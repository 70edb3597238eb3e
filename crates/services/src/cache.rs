//! Bounded least-recently-used puzzle cache.
//!
//! Entries live in a slot arena; a hash index maps ids to slots and an
//! intrusive doubly linked list through the slots tracks recency. Eviction
//! reuses the tail slot, so the arena never grows past `capacity`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use storage::repository::{CatalogError, PuzzleCatalog, StorageError};
use woodpecker_core::model::{DifficultyBand, PuzzleId, PuzzleRecord};

#[derive(Debug)]
struct Slot {
    puzzle: PuzzleRecord,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct PuzzleCache {
    capacity: usize,
    slots: Vec<Slot>,
    index: HashMap<PuzzleId, usize>,
    // most recently used
    head: Option<usize>,
    // least recently used
    tail: Option<usize>,
}

impl PuzzleCache {
    /// Create a cache holding at most `capacity` puzzles (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Membership check that does not touch recency.
    #[must_use]
    pub fn contains(&self, id: &PuzzleId) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a puzzle and mark it most recently used.
    pub fn get(&mut self, id: &PuzzleId) -> Option<&PuzzleRecord> {
        let slot = *self.index.get(id)?;
        self.touch(slot);
        Some(&self.slots[slot].puzzle)
    }

    /// Insert or refresh a puzzle. Returns the id evicted to make room, if any.
    pub fn insert(&mut self, puzzle: PuzzleRecord) -> Option<PuzzleId> {
        if let Some(&slot) = self.index.get(puzzle.id()) {
            self.slots[slot].puzzle = puzzle;
            self.touch(slot);
            return None;
        }

        if self.slots.len() < self.capacity {
            let slot = self.slots.len();
            self.index.insert(puzzle.id().clone(), slot);
            self.slots.push(Slot {
                puzzle,
                prev: None,
                next: None,
            });
            self.push_front(slot);
            return None;
        }

        let slot = self.tail?;
        self.unlink(slot);
        let evicted = self.slots[slot].puzzle.id().clone();
        self.index.remove(&evicted);
        self.index.insert(puzzle.id().clone(), slot);
        self.slots[slot].puzzle = puzzle;
        self.push_front(slot);
        log::debug!("puzzle cache evicted {evicted}");
        Some(evicted)
    }

    /// Ids from most to least recently used.
    #[must_use]
    pub fn recency_order(&self) -> Vec<PuzzleId> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            out.push(self.slots[slot].puzzle.id().clone());
            cursor = self.slots[slot].next;
        }
        out
    }

    fn touch(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;
        if let Some(old) = self.head {
            self.slots[old].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

/// A `PuzzleCatalog` that serves id lookups from a shared `PuzzleCache`.
#[derive(Clone)]
pub struct CachedCatalog {
    inner: Arc<dyn PuzzleCatalog>,
    cache: Arc<Mutex<PuzzleCache>>,
}

impl CachedCatalog {
    #[must_use]
    pub fn new(inner: Arc<dyn PuzzleCatalog>, cache: Arc<Mutex<PuzzleCache>>) -> Self {
        Self { inner, cache }
    }

    #[must_use]
    pub fn with_capacity(inner: Arc<dyn PuzzleCatalog>, capacity: usize) -> Self {
        Self::new(inner, Arc::new(Mutex::new(PuzzleCache::new(capacity))))
    }

    #[must_use]
    pub fn cache(&self) -> Arc<Mutex<PuzzleCache>> {
        Arc::clone(&self.cache)
    }

    fn remember(&self, puzzle: &PuzzleRecord) {
        // a poisoned cache only costs a catalog round trip
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(puzzle.clone());
        }
    }
}

#[async_trait]
impl PuzzleCatalog for CachedCatalog {
    async fn get_by_id(&self, id: &PuzzleId) -> Result<PuzzleRecord, CatalogError> {
        let hit = self
            .cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(id).cloned());
        if let Some(puzzle) = hit {
            return Ok(puzzle);
        }

        let puzzle = self.inner.get_by_id(id).await?;
        self.remember(&puzzle);
        Ok(puzzle)
    }

    async fn get_by_band(
        &self,
        band: DifficultyBand,
        exclude: &HashSet<PuzzleId>,
    ) -> Result<PuzzleRecord, CatalogError> {
        // composition draws are not cached; only solve-time lookups are
        self.inner.get_by_band(band, exclude).await
    }

    async fn upsert_puzzle(&self, puzzle: &PuzzleRecord) -> Result<(), StorageError> {
        self.inner.upsert_puzzle(puzzle).await?;
        if let Ok(mut cache) = self.cache.lock() {
            if cache.contains(puzzle.id()) {
                cache.insert(puzzle.clone());
            }
        }
        Ok(())
    }

    async fn count_by_band(&self, band: DifficultyBand) -> Result<u64, StorageError> {
        self.inner.count_by_band(band).await
    }
}
