/*!
 * Idempotency Registry
 *
 * A repeated key within the window replays the stored result instead of
 * running the operation again. A key whose first request is still running
 * is rejected rather than waited on. Failed attempts release their claim
 * so the caller can retry.
 */

use super::operation::OperationResult;
use crate::core::clock::Clock;
use crate::core::errors::ValidationError;
use crate::core::limits::PURGE_INTERVAL;
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Debug, Clone)]
enum Slot {
    InFlight,
    Completed {
        result: OperationResult,
        at: SystemTime,
    },
}

pub struct IdempotencyRegistry {
    slots: DashMap<String, Slot, RandomState>,
    clock: Arc<dyn Clock>,
    window: Duration,
    claims: AtomicU64,
}

/// Result of claiming a key
pub enum Claim<'a> {
    /// First request in the window; run the operation
    Fresh(ClaimGuard<'a>),
    /// Seen before; this is the stored result
    Replay(OperationResult),
}

impl IdempotencyRegistry {
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
            clock,
            window,
            claims: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn claim(&self, key: &str) -> Result<Claim<'_>, ValidationError> {
        // Sweep before `entry` takes a shard lock that `retain` would need
        let calls = self.claims.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % PURGE_INTERVAL == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, "Expired idempotency slots purged");
            }
        }

        let now = self.clock.now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let replay = match occupied.get() {
                    Slot::InFlight => {
                        return Err(ValidationError::DuplicateInFlight {
                            key: key.to_string(),
                        })
                    }
                    Slot::Completed { result, at } if !self.expired(*at, now) => {
                        Some(result.clone())
                    }
                    Slot::Completed { .. } => None,
                };
                match replay {
                    Some(result) => {
                        debug!(key, "Idempotent replay");
                        Ok(Claim::Replay(result))
                    }
                    None => {
                        occupied.insert(Slot::InFlight);
                        Ok(Claim::Fresh(ClaimGuard::new(self, key)))
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::InFlight);
                Ok(Claim::Fresh(ClaimGuard::new(self, key)))
            }
        }
    }

    fn expired(&self, at: SystemTime, now: SystemTime) -> bool {
        now.duration_since(at).unwrap_or(Duration::ZERO) >= self.window
    }

    /// Drop completed entries older than the window
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::InFlight => true,
            Slot::Completed { at, .. } => !self.expired(*at, now),
        });
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Holds an in-flight key; releases it on drop unless completed
pub struct ClaimGuard<'a> {
    registry: &'a IdempotencyRegistry,
    key: String,
    done: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(registry: &'a IdempotencyRegistry, key: &str) -> Self {
        Self {
            registry,
            key: key.to_string(),
            done: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store the result for replay
    pub fn complete(mut self, result: &OperationResult) {
        let at = self.registry.clock.now();
        self.registry.slots.insert(
            self.key.clone(),
            Slot::Completed {
                result: result.clone(),
                at,
            },
        );
        self.done = true;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.registry
                .slots
                .remove_if(&self.key, |_, slot| matches!(slot, Slot::InFlight));
        }
    }
}
