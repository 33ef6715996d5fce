/*!
 * Cache Layer
 * Signed, tag-aware remember/invalidate on top of a CacheStore
 */

use super::signing::KeyedHasher;
use super::store::{CacheEntry, CacheStore};
use super::CacheStats;
use crate::core::clock::Clock;
use crate::core::errors::IntegrityError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const KEY_DOMAIN: &[u8] = b"cache-key";
const ENTRY_DOMAIN: &[u8] = b"cache-entry";

/// Cache front end used by the permission resolver, rate limiter and
/// executor
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    hasher: KeyedHasher,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    integrity_failures: AtomicU64,
}

impl CacheLayer {
    pub fn new(
        store: Arc<dyn CacheStore>,
        hasher: KeyedHasher,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
        }
    }

    /// Storage key for a raw cache key
    pub fn derive_key(&self, raw: &str) -> String {
        format!("c:{}", self.hasher.sign(&[KEY_DOMAIN, raw.as_bytes()]))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Return the cached value, or compute, store and return it
    ///
    /// Producer errors are propagated and never cached.
    pub fn remember<V, E, F>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V, E>,
    {
        self.remember_tagged(key, ttl, &[], producer)
    }

    /// `remember` with invalidation tags attached to a freshly stored value
    pub fn remember_tagged<V, E, F>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[String],
        producer: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = producer()?;
        self.put(key, &value, ttl, tags);
        Ok(value)
    }

    /// Verified lookup; expired or corrupted entries are evicted
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let derived = self.derive_key(key);
        let entry = match self.store.get(&derived) {
            Some(entry) => entry,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            self.store.remove(&derived);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache entry expired");
            return None;
        }

        if !self.verify(&entry) {
            self.reject(key, &derived);
            return None;
        }

        match serde_json::from_slice(&entry.value) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(_) => {
                self.reject(key, &derived);
                None
            }
        }
    }

    /// Sign and store a value, returning false if it could not be encoded
    pub fn put<V: Serialize>(&self, key: &str, value: &V, ttl: Duration, tags: &[String]) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Cache value not serializable, skipping");
                return false;
            }
        };

        let derived = self.derive_key(key);
        let mut entry = CacheEntry {
            key: derived,
            value: bytes,
            tags: tags.iter().cloned().collect(),
            expires_at: self.clock.now() + ttl,
            signature: String::new(),
        };
        entry.signature = self.sign(&entry);
        self.store.put(entry);
        true
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.store.remove(&self.derive_key(key))
    }

    /// Flush every entry carrying `tag`
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let removed = self.store.remove_tag(tag);
        if removed > 0 {
            debug!(tag, removed, "Cache tag invalidated");
        }
        removed
    }

    /// Bump a fixed-window counter under a derived key
    pub fn increment(&self, key: &str, window: Duration) -> u64 {
        self.store
            .increment(&self.derive_key(key), window, self.clock.now())
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            size: self.store.len(),
            hits,
            misses,
            expirations: self.expirations.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            hit_rate,
        }
    }

    fn reject(&self, key: &str, derived: &str) {
        self.store.remove(derived);
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        let error = IntegrityError::CacheEntryCorrupted {
            key: derived.to_string(),
        };
        warn!(key, error = %error, "Evicting corrupted cache entry");
    }

    fn sign(&self, entry: &CacheEntry) -> String {
        let expires = millis(entry.expires_at).to_be_bytes();
        let tags = join_tags(&entry.tags);
        self.hasher.sign(&[
            ENTRY_DOMAIN,
            entry.key.as_bytes(),
            &entry.value,
            &expires,
            tags.as_bytes(),
        ])
    }

    fn verify(&self, entry: &CacheEntry) -> bool {
        let expires = millis(entry.expires_at).to_be_bytes();
        let tags = join_tags(&entry.tags);
        self.hasher.verify(
            &[
                ENTRY_DOMAIN,
                entry.key.as_bytes(),
                &entry.value,
                &expires,
                tags.as_bytes(),
            ],
            &entry.signature,
        )
    }
}

fn millis(at: SystemTime) -> u128 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn join_tags(tags: &BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}
