//! Process-wide cache of downloaded scratch contents.
//!
//! Entries are keyed by `(bucket, object)` and validated against the
//! caller's generation tuple on every lookup: only an entry that mirrors
//! exactly the generation the caller holds is handed out. Total cached
//! bytes are soft-capped; least-recently-used entries are evicted to get
//! back under the cap.

use std::sync::Arc;

use hashlink::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::clock::Clock;
use crate::fs::inode::Generation;

use super::{Scratch, SharedScratch};

/// Cache key: one object within one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub bucket_name: String,
    pub object_name: String,
}

impl CacheKey {
    pub fn new(bucket_name: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            object_name: object_name.into(),
        }
    }
}

struct CacheEntry {
    generation: Generation,
    size: u64,
    scratch: SharedScratch,
}

struct CacheState {
    // Unbounded LRU; byte-budget eviction is handled manually below.
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: u64,
}

/// Shared, generation-validated scratch store.
pub struct ContentCache {
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl ContentCache {
    pub fn new(max_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            max_bytes,
            state: Mutex::new(CacheState {
                entries: LruCache::new_unbounded(),
                total_bytes: 0,
            }),
        })
    }

    /// Look up the scratch for `key`, but only if the cached entry mirrors
    /// exactly `generation`. A stale entry is left in place for `add_or_replace`
    /// to overwrite.
    pub fn get(&self, key: &CacheKey, generation: Generation) -> Option<SharedScratch> {
        let mut state = self.state.lock();
        let entry = state.entries.get(key)?;
        if entry.generation != generation {
            trace!(
                object = %key.object_name,
                cached = %entry.generation,
                wanted = %generation,
                "content cache generation mismatch"
            );
            return None;
        }
        Some(Arc::clone(&entry.scratch))
    }

    /// Install a freshly downloaded content for `key`, replacing any prior
    /// entry, and return the shared scratch. Evicts least-recently-used
    /// entries if the byte budget is exceeded.
    pub fn add_or_replace(
        &self,
        key: CacheKey,
        generation: Generation,
        contents: Vec<u8>,
        clock: Arc<dyn Clock>,
    ) -> SharedScratch {
        let size = contents.len() as u64;
        let scratch: SharedScratch = Arc::new(Mutex::new(Scratch::from_bytes(contents, clock)));

        let mut state = self.state.lock();
        if let Some(old) = state.entries.remove(&key) {
            state.total_bytes -= old.size;
            old.scratch.lock().destroy();
        }
        state.entries.insert(
            key,
            CacheEntry {
                generation,
                size,
                scratch: Arc::clone(&scratch),
            },
        );
        state.total_bytes += size;

        // Never evict the entry just handed to the caller, even if it alone
        // exceeds the budget.
        while state.total_bytes > self.max_bytes && state.entries.len() > 1 {
            let Some((evicted_key, evicted)) = state.entries.remove_lru() else {
                break;
            };
            trace!(object = %evicted_key.object_name, "evicting cached content");
            state.total_bytes -= evicted.size;
            evicted.scratch.lock().destroy();
        }

        scratch
    }

    /// Drop and destroy the entry for `key`, if any.
    pub fn remove(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(key) {
            state.total_bytes -= entry.size;
            entry.scratch.lock().destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
