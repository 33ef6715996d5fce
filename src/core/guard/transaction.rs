/*!
 * Transaction Guards
 *
 * RAII wrapper around a store transaction with automatic rollback
 */

use super::traits::{Guard, GuardDrop, Recoverable};
use super::{GuardError, GuardMetadata, GuardResult};
use crate::core::types::OperationId;
use crate::store::{Transaction, TransactionalStore};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, info};

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction in progress
    Active,
    /// Transaction committed successfully
    Committed,
    /// Transaction rolled back
    RolledBack,
    /// Transaction poisoned (panic during execution)
    Poisoned,
}

/// Transaction guard with automatic rollback
///
/// # Example
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(&store, None)?;
/// tx.execute(|t| t.put("k", json!(1)))??;
/// tx.commit()?; // Or auto-rollback on drop
/// ```
pub struct TransactionGuard {
    tx: Option<Box<dyn Transaction>>,
    state: TransactionState,
    metadata: GuardMetadata,
    poison_reason: Option<String>,
}

impl TransactionGuard {
    /// Begin a transaction on `store`
    pub fn begin(
        store: &dyn TransactionalStore,
        operation_id: Option<OperationId>,
    ) -> GuardResult<Self> {
        let tx = store.begin()?;
        let mut metadata = GuardMetadata::new("transaction");
        if let Some(id) = operation_id {
            metadata = metadata.with_operation(id);
        }

        Ok(Self {
            tx: Some(tx),
            state: TransactionState::Active,
            metadata,
            poison_reason: None,
        })
    }

    /// Borrow the open transaction
    pub fn transaction(&mut self) -> GuardResult<&mut dyn Transaction> {
        if self.state != TransactionState::Active {
            return Err(GuardError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: "Active".to_string(),
            });
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(tx.as_mut()),
            None => Err(GuardError::AlreadyReleased),
        }
    }

    /// Execute a function within the transaction
    ///
    /// If the function panics, transaction is marked as poisoned
    pub fn execute<F, R>(&mut self, f: F) -> GuardResult<R>
    where
        F: FnOnce(&mut dyn Transaction) -> R,
    {
        let tx = self.transaction()?;
        let result = catch_unwind(AssertUnwindSafe(|| f(tx)));

        match result {
            Ok(value) => Ok(value),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.poison(format!("Panic during transaction: {}", message));
                Err(GuardError::Poisoned(
                    self.poison_reason.clone().unwrap_or_default(),
                ))
            }
        }
    }

    /// Commit the transaction
    pub fn commit(mut self) -> GuardResult<()> {
        if self.state != TransactionState::Active {
            return Err(GuardError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: "Committed".to_string(),
            });
        }

        let tx = self.tx.take().ok_or(GuardError::AlreadyReleased)?;
        tx.commit()?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Manually rollback the transaction (also valid when poisoned)
    pub fn rollback(mut self) -> GuardResult<()> {
        self.do_rollback()
    }

    fn do_rollback(&mut self) -> GuardResult<()> {
        match self.state {
            TransactionState::Active | TransactionState::Poisoned => {}
            other => {
                return Err(GuardError::InvalidTransition {
                    from: format!("{:?}", other),
                    to: "RolledBack".to_string(),
                })
            }
        }

        let tx = self.tx.take().ok_or(GuardError::AlreadyReleased)?;
        self.state = TransactionState::RolledBack;
        tx.rollback()?;
        Ok(())
    }

    /// Get current transaction state
    pub fn state(&self) -> TransactionState {
        self.state
    }
}

/// Best-effort text from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Guard for TransactionGuard {
    fn resource_type(&self) -> &'static str {
        "transaction"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn release(&mut self) -> GuardResult<()> {
        if self.tx.is_some() {
            self.do_rollback()
        } else {
            Err(GuardError::AlreadyReleased)
        }
    }
}

impl GuardDrop for TransactionGuard {
    fn on_drop(&mut self) {
        if self.tx.is_some() {
            info!(
                operation_id = ?self.metadata.operation_id,
                lifetime_us = self.metadata.lifetime_micros(),
                "Transaction auto-rolling back"
            );
            if let Err(e) = self.do_rollback() {
                error!(error = %e, "Transaction rollback failed");
            }
        }
    }
}

impl Recoverable for TransactionGuard {
    fn is_poisoned(&self) -> bool {
        self.state == TransactionState::Poisoned
    }

    fn recover(&mut self) -> GuardResult<()> {
        if self.state != TransactionState::Poisoned {
            return Ok(());
        }

        // Attempt rollback to recover
        self.do_rollback()?;
        self.poison_reason = None;
        Ok(())
    }

    fn poison_reason(&self) -> Option<&str> {
        self.poison_reason.as_deref()
    }

    fn poison(&mut self, reason: String) {
        self.state = TransactionState::Poisoned;
        self.poison_reason = Some(reason);
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.on_drop();
    }
}
