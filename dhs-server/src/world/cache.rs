//! Keeps recently built LOD data in memory.
//!
//! Units of the same section always run on the same region worker, one after another. A request
//! that arrives while the same section is being built therefore waits behind that build and is
//! answered from the cache, so concurrent requests for one section share a single load.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use anyhow::Result;
use dhs_core::DetailLevel;
use dhs_core::DimensionId;
use dhs_core::LodChunkKey;
use dhs_core::SectionPos;
use glam::I64Vec2;
use log::trace;

use super::DimensionInfo;
use super::RawLod;
use super::WorldDataProvider;
use crate::stats::BridgeStats;

struct Cached {
    lod: RawLod,
    last_used: u64,
}

#[derive(Default)]
struct Entries {
    lods: HashMap<LodChunkKey, Cached>,
    /// bumped on every access, orders the entries by recency
    clock: u64,
}

impl Entries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// A bounded least-recently-used cache of built sections.
pub struct LodCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl LodCache {
    /// A capacity of 0 disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().lods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, key: &LodChunkKey) -> Option<RawLod> {
        let mut entries = self.lock();
        let now = entries.tick();
        let cached = entries.lods.get_mut(key)?;
        cached.last_used = now;
        Some(cached.lod.clone())
    }

    /// Stores the data of a section, evicting the least recently used one if the cache is full.
    pub fn insert(&self, key: LodChunkKey, lod: RawLod) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        let now = entries.tick();
        if !entries.lods.contains_key(&key) && entries.lods.len() >= self.capacity {
            let oldest = entries
                .lods
                .iter()
                .min_by_key(|(_key, cached)| cached.last_used)
                .map(|(key, _cached)| *key);
            if let Some(oldest) = oldest {
                trace!("evicting {oldest} from the LOD cache");
                entries.lods.remove(&oldest);
            }
        }
        entries.lods.insert(key, Cached { lod, last_used: now });
    }

    /// Drops the cached data of a section. Returns whether there was any.
    pub fn invalidate(&self, key: &LodChunkKey) -> bool {
        self.lock().lods.remove(key).is_some()
    }

    /// Drops every cached section covering the given block, at all detail levels.
    ///
    /// Hosts call this whenever a block changes. Returns the number of dropped sections.
    pub fn touch(&self, dimension: DimensionId, block: I64Vec2) -> usize {
        let mut entries = self.lock();
        let mut dropped = 0;
        for level in DetailLevel::MIN.value()..=DetailLevel::MAX.value() {
            let Ok(detail) = DetailLevel::new(level) else {
                continue;
            };
            let Ok(section) = SectionPos::containing_block(detail, block) else {
                continue;
            };
            if entries
                .lods
                .remove(&LodChunkKey::new(dimension, section))
                .is_some()
            {
                dropped += 1;
            }
        }
        dropped
    }

    pub fn clear(&self) {
        self.lock().lods.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Answers loads from a [`LodCache`] and fills it from the wrapped provider.
///
/// Sections without data are not cached, they may be generated at any time.
pub struct CachingProvider {
    inner: Arc<dyn WorldDataProvider>,
    cache: Arc<LodCache>,
    stats: Arc<BridgeStats>,
}

impl CachingProvider {
    #[must_use]
    pub fn new(
        inner: Arc<dyn WorldDataProvider>,
        cache: Arc<LodCache>,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            inner,
            cache,
            stats,
        }
    }
}

impl WorldDataProvider for CachingProvider {
    fn dimension(&self, id: DimensionId) -> Option<DimensionInfo> {
        self.inner.dimension(id)
    }

    fn load_lod(&self, key: &LodChunkKey) -> Result<Option<RawLod>> {
        if let Some(lod) = self.cache.get(key) {
            self.stats.record_cache_hit();
            return Ok(Some(lod));
        }
        self.stats.record_cache_miss();
        let lod = self.inner.load_lod(key)?;
        if let Some(lod) = &lod {
            self.cache.insert(*key, lod.clone());
        }
        Ok(lod)
    }
}
