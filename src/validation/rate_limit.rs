/*!
 * Rate Limiter
 * Fixed-window request counters kept in the cache store
 */

use crate::cache::{compose_key, CacheLayer};
use crate::core::config::RateLimitConfig;
use crate::core::errors::SecurityError;
use std::sync::Arc;
use tracing::warn;

/// Fixed-window limiter keyed by `(identity, operation type)`
///
/// Counters are incremented atomically by the store and reset once their
/// window ends; the store sweeps ended windows every `PURGE_INTERVAL`
/// increments.
pub struct RateLimiter {
    cache: Arc<CacheLayer>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheLayer>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request against `key`
    ///
    /// Returns the number of requests seen in the current window.
    pub fn hit(&self, key: &str) -> Result<u64, SecurityError> {
        let count = self
            .cache
            .increment(&compose_key("rate", &[key]), self.config.window);

        if count > self.config.max_requests {
            warn!(
                key,
                count,
                limit = self.config.max_requests,
                "Rate limit exceeded"
            );
            return Err(SecurityError::RateLimited {
                key: key.to_string(),
                limit: self.config.max_requests,
                window_secs: self.config.window.as_secs(),
            });
        }
        Ok(count)
    }
}
