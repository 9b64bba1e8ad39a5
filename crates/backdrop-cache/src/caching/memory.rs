use std::mem;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::asset::{Asset, AssetId};

/// Bookkeeping cost of a single entry on top of its pixel buffer.
const ENTRY_OVERHEAD: usize = mem::size_of::<(AssetId, Asset)>();

/// An in-memory cache of resolved [`Asset`]s, bounded by the size of their pixel buffers.
///
/// Eviction is least-recently-used once the total weight exceeds the configured capacity. It
/// happens in the background of regular cache operations and never fails.
#[derive(Clone)]
pub struct MemoryCache {
    cache: Cache<AssetId, Asset>,
    capacity: u64,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` bytes of decoded pixels.
    pub fn new(capacity: u64) -> Self {
        let cache = Cache::builder()
            .name("movie-assets")
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .weigher(|_id, asset: &Asset| {
                let size = ENTRY_OVERHEAD + asset.byte_size();
                u32::try_from(size).unwrap_or(u32::MAX)
            })
            .build();

        Self { cache, capacity }
    }

    pub fn get(&self, id: &AssetId) -> Option<Asset> {
        self.cache.get(id)
    }

    /// Stores a resolved asset. Placeholders are ignored.
    pub(crate) fn insert(&self, asset: Asset) {
        if asset.is_placeholder() {
            tracing::warn!(id = %asset.id(), "Refusing to keep a placeholder in memory");
            return;
        }
        self.cache.insert(asset.id().clone(), asset);
    }

    pub fn remove(&self, id: &AssetId) {
        self.cache.invalidate(id);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The number of entries, after applying all pending evictions.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// The total weight of all entries, after applying all pending evictions.
    pub fn weighted_size(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }
}
