/*!
 * Backup and Recovery
 * Snapshots of undo state, restore, and emergency mode
 */

mod manager;
mod snapshot;

pub use manager::{EmergencyState, RecoveryManager};
pub use snapshot::{Snapshot, UndoAction};

use crate::core::errors::{KernelError, SystemError};
use crate::core::types::SnapshotId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a restore writes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// Transaction rollback already discarded record writes; undo files only
    ArtifactsOnly,
    /// Rollback or commit failed; also write captured records back
    Full,
}

/// Outcome of a successful restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("Unknown snapshot {0}")]
    UnknownSnapshot(SnapshotId),

    #[error("Restore of {snapshot} failed: {reason}")]
    Failed { snapshot: SnapshotId, reason: String },
}

impl From<RecoveryError> for KernelError {
    fn from(err: RecoveryError) -> Self {
        let (snapshot, reason) = match err {
            RecoveryError::UnknownSnapshot(id) => (id, "snapshot not found".to_string()),
            RecoveryError::Failed { snapshot, reason } => (snapshot, reason),
        };
        KernelError::System(SystemError::RecoveryFailed {
            snapshot: snapshot.0,
            reason,
        })
    }
}
