/*!
 * Row Locks
 * Exclusive per-key locks owned by transactions, with bounded waits
 */

use super::{StoreError, StoreResult, TxId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lock table keyed by row
///
/// Locks are reentrant for the owning transaction and released all at once
/// when that transaction finishes.
#[derive(Default)]
pub struct RowLocks {
    owners: Mutex<HashMap<String, TxId>>,
    released: Condvar,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` for `tx`, waiting at most `timeout`
    pub fn acquire(&self, key: &str, tx: TxId, timeout: Duration) -> StoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut owners = self.owners.lock();

        loop {
            match owners.get(key) {
                None => {
                    owners.insert(key.to_string(), tx);
                    return Ok(());
                }
                Some(owner) if *owner == tx => return Ok(()),
                Some(owner) => {
                    debug!(key, tx, owner = *owner, "Waiting for row lock");
                    if self.released.wait_until(&mut owners, deadline).timed_out() {
                        if matches!(owners.get(key), Some(o) if *o != tx) {
                            return Err(StoreError::LockTimeout {
                                key: key.to_string(),
                                waited: timeout,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Release every key in `keys` still owned by `tx`
    pub fn release_all<'a, I>(&self, tx: TxId, keys: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut owners = self.owners.lock();
        for key in keys {
            if owners.get(key) == Some(&tx) {
                owners.remove(key);
            }
        }
        drop(owners);
        self.released.notify_all();
    }

    /// Current owner of a row, if locked
    pub fn owner(&self, key: &str) -> Option<TxId> {
        self.owners.lock().get(key).copied()
    }

    pub fn held(&self) -> usize {
        self.owners.lock().len()
    }
}
