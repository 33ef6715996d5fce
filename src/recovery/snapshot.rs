/*!
 * Snapshots
 * Minimal undo state captured before a protected operation runs
 */

use crate::core::types::{OperationId, Record, SnapshotId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::SystemTime;

/// A single step that reverses one side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UndoAction {
    /// Put the committed value back (`None` deletes the row)
    RestoreRecord { key: String, value: Option<Record> },
    /// Delete a file the operation created
    RemoveFile { path: PathBuf },
    /// Rewrite a file the operation overwrote
    RestoreFile { path: PathBuf, contents: Vec<u8> },
}

impl UndoAction {
    pub fn is_record(&self) -> bool {
        matches!(self, UndoAction::RestoreRecord { .. })
    }

    fn target(&self) -> String {
        match self {
            UndoAction::RestoreRecord { key, .. } => format!("record:{}", key),
            UndoAction::RemoveFile { path } | UndoAction::RestoreFile { path, .. } => {
                format!("file:{}", path.display())
            }
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    actions: Vec<UndoAction>,
    #[serde(skip)]
    targets: HashSet<String>,
}

impl Snapshot {
    pub(crate) fn new(
        id: SnapshotId,
        operation_id: Option<OperationId>,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            operation_id,
            created_at,
            actions: Vec::new(),
            targets: HashSet::new(),
        }
    }

    /// Remember an undo step; only the first step per target is kept since
    /// it holds the state from before the operation touched it
    pub(crate) fn push(&mut self, action: UndoAction) -> bool {
        if !self.targets.insert(action.target()) {
            return false;
        }
        self.actions.push(action);
        true
    }

    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_record()).count()
    }
}
