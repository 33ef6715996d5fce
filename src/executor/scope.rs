/*!
 * Operation Scope
 * What an operation body may touch while the kernel's transaction is open
 *
 * Record writes go through the transaction and capture the prior value
 * into the snapshot the first time a key is written. File writes record
 * the undo step before touching the disk.
 */

use super::context::SecurityContext;
use crate::core::errors::{KernelResult, SystemError};
use crate::core::types::{OperationId, Record, SnapshotId};
use crate::recovery::{RecoveryManager, UndoAction};
use crate::store::Transaction;
use std::collections::BTreeSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::trace;

pub struct OperationScope<'a> {
    operation_id: OperationId,
    context: &'a SecurityContext,
    tx: &'a mut dyn Transaction,
    recovery: &'a RecoveryManager,
    /// `None` for read-only operations
    snapshot: Option<SnapshotId>,
    lock_timeout: Duration,
    written: BTreeSet<String>,
}

impl<'a> OperationScope<'a> {
    pub(crate) fn new(
        operation_id: OperationId,
        context: &'a SecurityContext,
        tx: &'a mut dyn Transaction,
        recovery: &'a RecoveryManager,
        snapshot: Option<SnapshotId>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            operation_id,
            context,
            tx,
            recovery,
            snapshot,
            lock_timeout,
            written: BTreeSet::new(),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn context(&self) -> &SecurityContext {
        self.context
    }

    /// Read, seeing this operation's own writes
    pub fn get(&self, key: &str) -> KernelResult<Option<Record>> {
        Ok(self.tx.get(key)?)
    }

    /// Lock the row for the rest of the transaction, then read
    pub fn get_for_update(&mut self, key: &str) -> KernelResult<Option<Record>> {
        Ok(self.tx.get_for_update(key, self.lock_timeout)?)
    }

    pub fn put(&mut self, key: &str, value: Record) -> KernelResult<()> {
        self.capture(key)?;
        self.tx.put(key, value)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> KernelResult<()> {
        self.capture(key)?;
        self.tx.delete(key)?;
        Ok(())
    }

    /// Write a file outside the transaction; it is removed (or its old
    /// contents put back) if the operation fails
    pub fn write_file(&mut self, path: impl AsRef<Path>, contents: &[u8]) -> KernelResult<()> {
        let path = path.as_ref();
        let snapshot = self.writable()?;

        let undo = match std::fs::read(path) {
            Ok(previous) => UndoAction::RestoreFile {
                path: path.to_path_buf(),
                contents: previous,
            },
            Err(e) if e.kind() == IoErrorKind::NotFound => UndoAction::RemoveFile {
                path: path.to_path_buf(),
            },
            Err(e) => return Err(e.into()),
        };
        self.recovery.track_artifact(snapshot, undo)?;

        std::fs::write(path, contents)?;
        trace!(operation_id = %self.operation_id, path = %path.display(), "File written");
        Ok(())
    }

    /// Register a file created by other means so a failure removes it
    pub fn track_created_file(&mut self, path: impl AsRef<Path>) -> KernelResult<()> {
        let snapshot = self.writable()?;
        self.recovery.track_artifact(
            snapshot,
            UndoAction::RemoveFile {
                path: path.as_ref().to_path_buf(),
            },
        )?;
        Ok(())
    }

    /// Keys written so far
    pub fn written(&self) -> &BTreeSet<String> {
        &self.written
    }

    fn writable(&self) -> KernelResult<SnapshotId> {
        self.snapshot.ok_or_else(|| {
            SystemError::OperationFailed {
                reason: "read-only operation attempted a write".into(),
            }
            .into()
        })
    }

    fn capture(&mut self, key: &str) -> KernelResult<()> {
        let snapshot = self.writable()?;
        if self.written.contains(key) {
            return Ok(());
        }
        // Lock before reading so the captured value cannot change under us
        let prior = self.tx.get_for_update(key, self.lock_timeout)?;
        self.recovery.capture_record(snapshot, key, prior)?;
        self.written.insert(key.to_string());
        Ok(())
    }
}
