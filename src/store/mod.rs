/*!
 * Transactional Store
 * Persistence interface consumed by the executor, plus an in-memory engine
 *
 * ## Features
 * - Begin/commit/rollback with buffered writes
 * - Row-level "lock for update" reads with bounded waits
 * - Versioned rows so callers can tell whether a row changed
 * - Out-of-transaction restore used by snapshot recovery
 */

mod locks;
mod memory;
mod traits;

pub use locks::RowLocks;
pub use memory::MemoryStore;
pub use traits::{Transaction, TransactionalStore, TxId};

use crate::core::errors::{KernelError, SecurityError, SystemError};
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Lock on {key} not acquired within {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    #[error("Transaction {0} already finished")]
    TransactionClosed(TxId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for KernelError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { key, waited } => KernelError::Security(SecurityError::LockTimeout {
                resource: key,
                waited_ms: waited.as_millis() as u64,
            }),
            other => KernelError::System(SystemError::Storage {
                reason: other.to_string(),
            }),
        }
    }
}
