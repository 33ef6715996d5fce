/*!
 * Store Traits
 * Interfaces for transactional persistence
 */

use super::StoreResult;
use crate::core::types::Record;
use std::time::Duration;

/// Transaction identifier
pub type TxId = u64;

/// Transactional persistence backend
pub trait TransactionalStore: Send + Sync {
    /// Start a new transaction
    fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    /// Read the last committed value, bypassing any transaction
    fn read_committed(&self, key: &str) -> StoreResult<Option<Record>>;

    /// Write (or delete, with `None`) a committed value outside any
    /// transaction. Takes the row lock first.
    fn restore(&self, key: &str, value: Option<Record>, lock_timeout: Duration)
        -> StoreResult<()>;
}

/// An open transaction
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction: Send {
    fn id(&self) -> TxId;

    /// Read a value, seeing this transaction's own writes
    fn get(&self, key: &str) -> StoreResult<Option<Record>>;

    /// Acquire the row lock, then read
    fn get_for_update(&mut self, key: &str, timeout: Duration) -> StoreResult<Option<Record>>;

    /// Buffer a write; locks the row if not already held
    fn put(&mut self, key: &str, value: Record) -> StoreResult<()>;

    /// Buffer a delete; locks the row if not already held
    fn delete(&mut self, key: &str) -> StoreResult<()>;

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
