/*!
 * Recovery Manager
 *
 * Owns snapshot lifecycle (create before execute, discard on commit,
 * restore on failure) and the emergency mode entered when a restore
 * cannot complete. While in emergency mode mutating operations are
 * rejected until an operator clears it.
 */

use super::snapshot::{Snapshot, UndoAction};
use super::{RecoveryError, RestoreMode, RestoreReport};
use crate::core::clock::Clock;
use crate::core::errors::{KernelResult, SecurityError};
use crate::core::types::{OperationId, Record, SnapshotId};
use crate::monitoring::alerts::{Alert, AlertDispatcher, AlertKind, AlertSeverity};
use crate::store::TransactionalStore;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Why and when the kernel entered emergency mode
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub snapshot: SnapshotId,
    pub reason: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub entered_at: SystemTime,
}

pub struct RecoveryManager {
    store: Arc<dyn TransactionalStore>,
    alerts: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
    snapshots: DashMap<SnapshotId, Snapshot, RandomState>,
    next_id: AtomicU64,
    emergency: RwLock<Option<EmergencyState>>,
    lock_timeout: Duration,
}

impl RecoveryManager {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        alerts: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            alerts,
            clock,
            snapshots: DashMap::with_hasher(RandomState::new()),
            next_id: AtomicU64::new(1),
            emergency: RwLock::new(None),
            lock_timeout,
        }
    }

    /// Open an empty snapshot; undo state is added as the operation runs
    pub fn create_snapshot(&self, operation_id: Option<OperationId>) -> SnapshotId {
        let id = SnapshotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.snapshots
            .insert(id, Snapshot::new(id, operation_id, self.clock.now()));
        debug!(snapshot_id = %id, operation_id = ?operation_id, "Snapshot created");
        id
    }

    /// Remember the value a record had before it was first written
    pub fn capture_record(
        &self,
        id: SnapshotId,
        key: &str,
        prior: Option<Record>,
    ) -> Result<bool, RecoveryError> {
        self.push(
            id,
            UndoAction::RestoreRecord {
                key: key.to_string(),
                value: prior,
            },
        )
    }

    /// Capture the currently committed value of `key`
    pub fn capture_committed(&self, id: SnapshotId, key: &str) -> KernelResult<bool> {
        let prior = self.store.read_committed(key)?;
        Ok(self.capture_record(id, key, prior)?)
    }

    /// Register an out-of-transaction side effect to undo on restore
    pub fn track_artifact(&self, id: SnapshotId, action: UndoAction) -> Result<bool, RecoveryError> {
        self.push(id, action)
    }

    fn push(&self, id: SnapshotId, action: UndoAction) -> Result<bool, RecoveryError> {
        let mut snapshot = self
            .snapshots
            .get_mut(&id)
            .ok_or(RecoveryError::UnknownSnapshot(id))?;
        Ok(snapshot.push(action))
    }

    pub fn snapshot(&self, id: SnapshotId) -> Option<Snapshot> {
        self.snapshots.get(&id).map(|s| s.clone())
    }

    /// Open snapshots
    pub fn active_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Drop a snapshot after commit
    pub fn discard(&self, id: SnapshotId) -> bool {
        let removed = self.snapshots.remove(&id).is_some();
        if removed {
            debug!(snapshot_id = %id, "Snapshot discarded");
        }
        removed
    }

    /// Apply a snapshot's undo actions in reverse order
    ///
    /// Every action is attempted even after one fails. Any failure puts
    /// the kernel into emergency mode and notifies the operator before
    /// returning.
    pub fn restore(&self, id: SnapshotId, mode: RestoreMode) -> KernelResult<RestoreReport> {
        let snapshot = match self.snapshots.remove(&id) {
            Some((_, snapshot)) => snapshot,
            None => {
                let err = RecoveryError::UnknownSnapshot(id);
                self.enter_emergency(id, err.to_string());
                return Err(err.into());
            }
        };

        let mut report = RestoreReport::default();
        let mut failures = Vec::new();

        for action in snapshot.actions().iter().rev() {
            if action.is_record() && mode == RestoreMode::ArtifactsOnly {
                report.skipped += 1;
                continue;
            }
            match self.apply(action) {
                Ok(()) => report.applied += 1,
                Err(reason) => {
                    warn!(snapshot_id = %id, action = ?action, reason = %reason, "Undo step failed");
                    failures.push(reason);
                }
            }
        }

        if failures.is_empty() {
            info!(
                snapshot_id = %id,
                applied = report.applied,
                skipped = report.skipped,
                mode = ?mode,
                "Snapshot restored"
            );
            return Ok(report);
        }

        let reason = failures.join("; ");
        self.enter_emergency(id, reason.clone());
        Err(RecoveryError::Failed {
            snapshot: id,
            reason,
        }
        .into())
    }

    fn apply(&self, action: &UndoAction) -> Result<(), String> {
        match action {
            UndoAction::RestoreRecord { key, value } => self
                .store
                .restore(key, value.clone(), self.lock_timeout)
                .map_err(|e| format!("record {}: {}", key, e)),
            UndoAction::RemoveFile { path } => remove_file(path),
            UndoAction::RestoreFile { path, contents } => std::fs::write(path, contents)
                .map_err(|e| format!("file {}: {}", path.display(), e)),
        }
    }

    fn enter_emergency(&self, snapshot: SnapshotId, reason: String) {
        error!(snapshot_id = %snapshot, reason = %reason, "Recovery failed, entering emergency mode");
        *self.emergency.write() = Some(EmergencyState {
            snapshot,
            reason: reason.clone(),
            entered_at: self.clock.now(),
        });

        let alert = Alert::new(
            AlertSeverity::Critical,
            AlertKind::EmergencyMode {
                snapshot: snapshot.0,
                reason: reason.clone(),
            },
            format!("Recovery of {} failed: {}", snapshot, reason),
        );
        if let Err(e) = self.alerts.deliver_now(&alert) {
            error!(snapshot_id = %snapshot, error = %e, "Emergency notification failed");
        }
    }

    pub fn emergency(&self) -> Option<EmergencyState> {
        self.emergency.read().clone()
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.read().is_some()
    }

    /// Reject mutations while in emergency mode
    pub fn ensure_writable(&self) -> Result<(), SecurityError> {
        match &*self.emergency.read() {
            Some(state) => Err(SecurityError::EmergencyMode {
                reason: state.reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Lift emergency mode; returns false if it was not active
    pub fn clear_emergency(&self, operator: &str) -> bool {
        let previous = self.emergency.write().take();
        let Some(state) = previous else {
            return false;
        };

        info!(
            operator,
            snapshot_id = %state.snapshot,
            "Emergency mode cleared"
        );
        self.alerts.dispatch(Alert::new(
            AlertSeverity::Warning,
            AlertKind::EmergencyCleared {
                operator: operator.to_string(),
            },
            format!("Emergency mode cleared by {}", operator),
        ));
        true
    }
}

fn remove_file(path: &Path) -> Result<(), String> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("file {}: {}", path.display(), e)),
    }
}
