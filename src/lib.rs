/*!
 * Protected Operation Kernel
 *
 * Wraps business operations in a transaction with validation, RBAC
 * permission checks, result caching, snapshot-based recovery and an
 * audit trail.
 */

pub mod cache;
pub mod core;
pub mod executor;
pub mod monitoring;
pub mod permissions;
pub mod recovery;
pub mod store;
pub mod validation;

// Re-exports
pub use crate::core::{
    Clock, ErrorKind, ExecutionState, IdGenerator, IntegrityError, KernelConfig, KernelError,
    KernelResult, ManualClock, OperationId, RandomIdGenerator, SecurityError, SnapshotId,
    SystemClock, SystemError, ValidationError,
};
pub use cache::{CacheLayer, CacheStats, CacheStore, MemoryCacheStore};
pub use executor::{
    ContextSummary, Kernel, KernelBuilder, Operation, OperationDescriptor, OperationExecutor,
    OperationResult, OperationScope, SecurityContext, ValidationStatus,
};
pub use monitoring::{
    init_tracing, Alert, AlertKind, AuditRecord, AuditSink, MemoryAuditSink, MemoryNotifier,
    MetricsCollector, MetricsSnapshot, Notifier, Outcome,
};
pub use permissions::{
    MemoryPermissionStore, PermissionChecker, PermissionResolver, PermissionStore, Role, RoleData,
};
pub use recovery::{EmergencyState, RecoveryManager, RestoreMode, Snapshot, UndoAction};
pub use store::{MemoryStore, Transaction, TransactionalStore};
pub use validation::{BusinessRule, FieldRule, InputRules, StateTransitionRule};
