/*!
 * Cache Layer
 * Keyed-hash addressed cache with TTLs, signed entries and tag invalidation
 *
 * ## Features
 * - Keys derived with HMAC-SHA256 over a server-side secret
 * - Every entry carries an HMAC signature re-verified on read; mismatches
 *   are evicted and recomputed
 * - Tag index so one sweep flushes every entry sharing a tag
 * - Atomic fixed-window counters for rate limiting
 *
 * ## Usage
 * ```ignore
 * let value = cache.remember("report:42", Duration::from_secs(60), || {
 *     Ok::<_, KernelError>(build_report(42)?)
 * })?;
 * cache.invalidate_tag("resource:42");
 * ```
 */

mod keys;
mod layer;
mod signing;
mod store;

pub use keys::{compose_key, push_key_part};
pub use layer::CacheLayer;
pub use signing::KeyedHasher;
pub use store::{CacheEntry, CacheStore, MemoryCacheStore};

use serde::{Deserialize, Serialize};

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub integrity_failures: u64,
    pub hit_rate: f64,
}
