/*!
 * In-Memory Store
 * Transactional key/value engine with buffered writes and row locks
 */

use super::locks::RowLocks;
use super::traits::{Transaction, TransactionalStore, TxId};
use super::{StoreError, StoreResult};
use crate::core::limits::LOCK_TIMEOUT;
use crate::core::types::Record;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Committed row with its version
#[derive(Debug, Clone)]
struct VersionedRecord {
    value: Record,
    version: u64,
}

struct Inner {
    rows: RwLock<HashMap<String, VersionedRecord>>,
    locks: RowLocks,
    next_tx: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    write_lock_timeout: Duration,
}

/// In-memory transactional store
///
/// # Isolation
/// Reads see committed data plus the transaction's own writes. Writers
/// serialize on row locks, so a reader that locks a row observes either the
/// state before or after a concurrent writer, never a partial state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(LOCK_TIMEOUT)
    }

    /// Store whose implicit write locks wait at most `timeout`
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(HashMap::new()),
                locks: RowLocks::new(),
                next_tx: AtomicU64::new(1),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
                write_lock_timeout: timeout,
            }),
        }
    }

    /// Seed a committed row directly
    pub fn insert(&self, key: impl Into<String>, value: Record) {
        let mut rows = self.inner.rows.write();
        let key = key.into();
        let version = rows.get(&key).map(|r| r.version + 1).unwrap_or(1);
        rows.insert(key, VersionedRecord { value, version });
    }

    /// Committed version of a row (0 when absent)
    pub fn version(&self, key: &str) -> u64 {
        self.inner
            .rows
            .read()
            .get(key)
            .map(|r| r.version)
            .unwrap_or(0)
    }

    /// All committed rows in key order
    pub fn dump(&self) -> BTreeMap<String, Record> {
        self.inner
            .rows
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::Relaxed)
    }

    pub fn rollback_count(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::Relaxed)
    }

    /// Row locks currently held
    pub fn locks_held(&self) -> usize {
        self.inner.locks.held()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for MemoryStore {
    fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let id = self.inner.next_tx.fetch_add(1, Ordering::SeqCst);
        trace!(tx = id, "Transaction started");
        Ok(Box::new(MemoryTransaction {
            id,
            inner: self.inner.clone(),
            writes: BTreeMap::new(),
            held: HashSet::new(),
            finished: false,
        }))
    }

    fn read_committed(&self, key: &str) -> StoreResult<Option<Record>> {
        Ok(self.inner.rows.read().get(key).map(|r| r.value.clone()))
    }

    fn restore(
        &self,
        key: &str,
        value: Option<Record>,
        lock_timeout: Duration,
    ) -> StoreResult<()> {
        let id = self.inner.next_tx.fetch_add(1, Ordering::SeqCst);
        self.inner.locks.acquire(key, id, lock_timeout)?;
        {
            let mut rows = self.inner.rows.write();
            apply(&mut rows, key, value);
        }
        self.inner.locks.release_all(id, [&key.to_string()]);
        debug!(key, "Row restored");
        Ok(())
    }
}

fn apply(rows: &mut HashMap<String, VersionedRecord>, key: &str, value: Option<Record>) {
    match value {
        Some(value) => {
            let version = rows.get(key).map(|r| r.version + 1).unwrap_or(1);
            rows.insert(key.to_string(), VersionedRecord { value, version });
        }
        None => {
            rows.remove(key);
        }
    }
}

struct MemoryTransaction {
    id: TxId,
    inner: Arc<Inner>,
    writes: BTreeMap<String, Option<Record>>,
    held: HashSet<String>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::TransactionClosed(self.id));
        }
        Ok(())
    }

    fn lock(&mut self, key: &str, timeout: Duration) -> StoreResult<()> {
        if self.held.contains(key) {
            return Ok(());
        }
        self.inner.locks.acquire(key, self.id, timeout)?;
        self.held.insert(key.to_string());
        Ok(())
    }

    fn release(&mut self) {
        self.inner.locks.release_all(self.id, self.held.iter());
        self.held.clear();
        self.finished = true;
    }
}

impl Transaction for MemoryTransaction {
    fn id(&self) -> TxId {
        self.id
    }

    fn get(&self, key: &str) -> StoreResult<Option<Record>> {
        self.ensure_open()?;
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.inner.rows.read().get(key).map(|r| r.value.clone()))
    }

    fn get_for_update(&mut self, key: &str, timeout: Duration) -> StoreResult<Option<Record>> {
        self.ensure_open()?;
        self.lock(key, timeout)?;
        self.get(key)
    }

    fn put(&mut self, key: &str, value: Record) -> StoreResult<()> {
        self.ensure_open()?;
        let timeout = self.inner.write_lock_timeout;
        self.lock(key, timeout)?;
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let timeout = self.inner.write_lock_timeout;
        self.lock(key, timeout)?;
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.ensure_open()?;
        {
            let mut rows = self.inner.rows.write();
            for (key, value) in std::mem::take(&mut self.writes) {
                apply(&mut rows, &key, value);
            }
        }
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
        trace!(tx = self.id, "Transaction committed");
        self.release();
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.ensure_open()?;
        self.writes.clear();
        self.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
        trace!(tx = self.id, "Transaction rolled back");
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                tx = self.id,
                pending = self.writes.len(),
                "Transaction dropped without commit, rolling back"
            );
            self.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
            self.release();
        }
    }
}
