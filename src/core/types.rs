/*!
 * Core Types
 * Common types used across the kernel
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identifier
pub type UserId = String;

/// Role identifier
pub type RoleId = String;

/// Named capability string (e.g. `content.read`)
pub type Permission = String;

/// Identifier of the resource an operation targets
pub type ResourceId = String;

/// Persisted record value
pub type Record = serde_json::Value;

/// Unique id of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot identifier (monotonic per recovery manager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap-{}", self.0)
    }
}

/// Store key for a resource row
#[inline]
pub fn resource_key(resource: &str) -> String {
    format!("resource:{}", resource)
}
