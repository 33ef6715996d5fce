/*!
 * RAII Resource Guards
 *
 * Guards that release their resource automatically when dropped.
 *
 * ## Guard Types
 *
 * - **TransactionGuard**: Store transaction with automatic rollback and
 *   panic poisoning
 *
 * `ExecutionState` tracks where an attempt is in the executor's lifecycle.
 *
 * ## Example
 *
 * ```ignore
 * let mut tx = TransactionGuard::begin(&store, Some(operation_id))?;
 * tx.execute(|t| t.put("resource:doc", json!({"state": "draft"})))??;
 * tx.commit()?; // Or auto-rollback on drop
 * ```
 */

mod state;
mod traits;
mod transaction;

pub use state::ExecutionState;
pub use traits::{Guard, GuardDrop, Recoverable};
pub use transaction::{TransactionGuard, TransactionState};
pub(crate) use transaction::panic_message;

use crate::core::errors::{KernelError, SystemError};
use crate::core::types::OperationId;
use crate::store::StoreError;

/// Result type for guard operations
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors that can occur during guard operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardError {
    #[error("Resource already released")]
    AlreadyReleased,

    #[error("Guard is poisoned: {0}")]
    Poisoned(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<GuardError> for KernelError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Store(e) => e.into(),
            GuardError::Poisoned(reason) => KernelError::System(SystemError::Panicked { reason }),
            GuardError::InvalidTransition { from, to } => {
                KernelError::System(SystemError::InvalidTransition { from, to })
            }
            GuardError::AlreadyReleased => {
                KernelError::System(SystemError::Internal("guard already released".into()))
            }
        }
    }
}

/// Guard metadata for observability
#[derive(Debug, Clone)]
pub struct GuardMetadata {
    pub resource_type: &'static str,
    pub creation_time: std::time::Instant,
    pub operation_id: Option<OperationId>,
}

impl GuardMetadata {
    #[inline]
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            creation_time: std::time::Instant::now(),
            operation_id: None,
        }
    }

    #[inline]
    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    #[inline]
    pub fn lifetime_micros(&self) -> u64 {
        self.creation_time.elapsed().as_micros() as u64
    }
}
