/*!
 * Cache Stores
 * Backing storage for signed cache entries, tag index and window counters
 */

use crate::core::limits::PURGE_INTERVAL;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::trace;

/// Stored cache entry
///
/// `key` is the derived (keyed-hash) key, never the caller's raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub tags: BTreeSet<String>,
    pub expires_at: SystemTime,
    pub signature: String,
}

impl CacheEntry {
    #[inline]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

/// Storage backend for the cache layer
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Insert or replace an entry, indexing its tags
    fn put(&self, entry: CacheEntry);

    fn remove(&self, key: &str) -> bool;

    /// Remove every entry carrying `tag`, returning how many were removed
    fn remove_tag(&self, tag: &str) -> usize;

    /// Keys currently indexed under `tag`
    fn tagged(&self, tag: &str) -> Vec<String>;

    /// Atomically bump a fixed-window counter and return the new count
    ///
    /// The window starts at the first increment and resets once `now`
    /// passes its end.
    fn increment(&self, key: &str, window: Duration, now: SystemTime) -> u64;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    resets_at: SystemTime,
}

/// DashMap-backed cache store
///
/// Puts and tag sweeps are serialized through `sweep`: puts share it, a
/// sweep takes it exclusively, so an entry is never written with a tag that
/// a concurrent sweep has already dropped from the index.
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry, RandomState>,
    tags: DashMap<String, HashSet<String>, RandomState>,
    counters: DashMap<String, WindowCounter, RandomState>,
    increments: AtomicU64,
    sweep: RwLock<()>,
    max_size: usize,
}

impl MemoryCacheStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(max_size.min(4096), RandomState::new()),
            tags: DashMap::with_hasher(RandomState::new()),
            counters: DashMap::with_hasher(RandomState::new()),
            increments: AtomicU64::new(0),
            sweep: RwLock::new(()),
            max_size: max_size.max(1),
        }
    }

    fn unindex(&self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            let empty = match self.tags.get_mut(tag) {
                Some(mut keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if empty {
                self.tags.remove_if(tag, |_, keys| keys.is_empty());
            }
        }
    }

    fn evict_one(&self) {
        let victim = self.entries.iter().next().map(|e| e.key().clone());
        if let Some(key) = victim {
            if let Some((_, old)) = self.entries.remove(&key) {
                self.unindex(&key, &old.tags);
                trace!(key = %key, "Cache entry evicted for space");
            }
        }
    }

    /// Drop window counters whose window has ended
    pub fn purge_counters(&self, now: SystemTime) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, c| c.resets_at > now);
        before - self.counters.len()
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Overwrite a stored entry in place, bypassing signing
    pub fn tamper<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut CacheEntry),
    {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn put(&self, entry: CacheEntry) {
        let _shared = self.sweep.read();

        if !self.entries.contains_key(&entry.key) && self.entries.len() >= self.max_size {
            self.evict_one();
        }

        for tag in &entry.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }

        let key = entry.key.clone();
        let current = entry.tags.clone();
        if let Some(old) = self.entries.insert(key.clone(), entry) {
            let stale: BTreeSet<String> = old.tags.difference(&current).cloned().collect();
            self.unindex(&key, &stale);
        }
    }

    fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, old)) => {
                self.unindex(key, &old.tags);
                true
            }
            None => false,
        }
    }

    fn remove_tag(&self, tag: &str) -> usize {
        let _exclusive = self.sweep.write();

        let keys = match self.tags.remove(tag) {
            Some((_, keys)) => keys,
            None => return 0,
        };

        let mut removed = 0;
        for key in keys {
            if let Some((_, old)) = self.entries.remove(&key) {
                let others: BTreeSet<String> =
                    old.tags.into_iter().filter(|t| t != tag).collect();
                self.unindex(&key, &others);
                removed += 1;
            }
        }
        removed
    }

    fn tagged(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn increment(&self, key: &str, window: Duration, now: SystemTime) -> u64 {
        // Ended windows are swept before the entry lock is taken
        let calls = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % PURGE_INTERVAL == 0 {
            let purged = self.purge_counters(now);
            if purged > 0 {
                trace!(purged, "Ended rate windows purged");
            }
        }

        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert(WindowCounter {
                count: 0,
                resets_at: now + window,
            });

        if counter.resets_at <= now {
            counter.count = 0;
            counter.resets_at = now + window;
        }
        counter.count += 1;
        counter.count
    }

    fn clear(&self) {
        let _exclusive = self.sweep.write();
        self.entries.clear();
        self.tags.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
