/*!
 * Error Types
 * Centralized error taxonomy with thiserror, miette, and serde support
 *
 * Four kinds reach callers of the executor:
 * - `Validation`: malformed input or context, nothing was mutated
 * - `Security`: authentication, permission, rate limit, lock timeout
 * - `Integrity`: cache or result corruption
 * - `System`: unexpected fault, forces rollback and snapshot restore
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed input, context, or result
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    #[diagnostic(
        code(validation::missing_field),
        help("Supply the field in the security context or operation input.")
    )]
    MissingField { field: String },

    #[error("Malformed field {field}: {reason}")]
    #[diagnostic(code(validation::malformed_field))]
    MalformedField { field: String, reason: String },

    #[error("Field {field} violates rule {rule}")]
    #[diagnostic(
        code(validation::rule_violation),
        help("Check the operation's input rules for accepted values.")
    )]
    RuleViolation { field: String, rule: String },

    #[error("Business rule {rule} failed: {reason}")]
    #[diagnostic(code(validation::business_rule))]
    BusinessRule { rule: String, reason: String },

    #[error("Unknown {kind}: {id}")]
    #[diagnostic(code(validation::unknown_reference))]
    UnknownReference { kind: String, id: String },

    #[error("Operation with idempotency key {key} is already in flight")]
    #[diagnostic(
        code(validation::duplicate_in_flight),
        help("Wait for the first request to finish, then retry to receive its result.")
    )]
    DuplicateInFlight { key: String },

    #[error("Invalid operation result: {reason}")]
    #[diagnostic(code(validation::invalid_result))]
    InvalidResult { reason: String },

    #[error("Operation reported failure: {reason}")]
    #[diagnostic(code(validation::operation_rejected))]
    OperationRejected { reason: String },
}

/// Authentication, authorization, throttling and locking failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SecurityError {
    #[error("User {user} is not authenticated")]
    #[diagnostic(code(security::unauthenticated))]
    Unauthenticated { user: String },

    #[error("Session for {user} has expired")]
    #[diagnostic(code(security::session_expired), help("Re-authenticate and retry."))]
    SessionExpired { user: String },

    #[error("User {user} lacks permission {permission}")]
    #[diagnostic(
        code(security::permission_denied),
        help("Grant the permission to one of the user's roles or a parent role.")
    )]
    PermissionDenied { user: String, permission: String },

    #[error("Rate limit exceeded for {key}: {limit} per {window_secs}s")]
    #[diagnostic(code(security::rate_limited), help("Retry after the current window ends."))]
    RateLimited {
        key: String,
        limit: u64,
        window_secs: u64,
    },

    #[error("Lock on {resource} not acquired within {waited_ms}ms")]
    #[diagnostic(
        code(security::lock_timeout),
        help("Another operation holds the row. Retry later.")
    )]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("Assigning parent {parent} to role {role} would create a cycle")]
    #[diagnostic(
        code(security::hierarchy_cycle),
        help("Role inheritance must stay acyclic.")
    )]
    HierarchyCycle { role: String, parent: String },

    #[error("Kernel is in emergency mode: {reason}")]
    #[diagnostic(
        code(security::emergency_mode),
        help("An operator must clear emergency mode before mutating operations resume.")
    )]
    EmergencyMode { reason: String },
}

/// Corrupted cache entries or results
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum IntegrityError {
    #[error("Cache entry {key} failed signature verification")]
    #[diagnostic(code(integrity::cache_entry_corrupted))]
    CacheEntryCorrupted { key: String },

    #[error("Result digest mismatch for operation {operation}")]
    #[diagnostic(
        code(integrity::result_digest_mismatch),
        help("The result payload changed after it was produced.")
    )]
    ResultDigestMismatch { operation: String },
}

/// Unexpected faults
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SystemError {
    #[error("Operation failed: {reason}")]
    #[diagnostic(code(system::operation_failed))]
    OperationFailed { reason: String },

    #[error("Operation panicked: {reason}")]
    #[diagnostic(
        code(system::panicked),
        help("A bug in the operation body. The transaction was rolled back.")
    )]
    Panicked { reason: String },

    #[error("Storage failure: {reason}")]
    #[diagnostic(code(system::storage))]
    Storage { reason: String },

    #[error("Recovery of snapshot {snapshot} failed: {reason}")]
    #[diagnostic(
        code(system::recovery_failed),
        help("The kernel entered emergency mode. Inspect state and clear it manually.")
    )]
    RecoveryFailed { snapshot: u64, reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    #[diagnostic(code(system::invalid_transition))]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {reason}")]
    #[diagnostic(
        code(system::configuration),
        help("Invalid configuration. Review configuration parameters.")
    )]
    Configuration { reason: String },

    #[error("Internal error: {0}")]
    #[diagnostic(
        code(system::internal),
        help("An unexpected internal error occurred. Please report this issue.")
    )]
    Internal(String),
}

impl SystemError {
    /// Convenience constructor for operation bodies
    pub fn operation(reason: impl Into<String>) -> Self {
        SystemError::OperationFailed {
            reason: reason.into(),
        }
    }
}

/// Unified kernel error type with miette diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum KernelError {
    #[error("Validation error: {0}")]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error("Security error: {0}")]
    #[diagnostic(transparent)]
    Security(#[from] SecurityError),

    #[error("Integrity error: {0}")]
    #[diagnostic(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("System error: {0}")]
    #[diagnostic(transparent)]
    System(#[from] SystemError),
}

/// Common result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Error classification recorded in audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Security,
    Integrity,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Security => "security",
            ErrorKind::Integrity => "integrity",
            ErrorKind::System => "system",
        }
    }
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::Validation(_) => ErrorKind::Validation,
            KernelError::Security(_) => ErrorKind::Security,
            KernelError::Integrity(_) => ErrorKind::Integrity,
            KernelError::System(_) => ErrorKind::System,
        }
    }

    /// Expected outcomes are surfaced as-is; only system faults are unexpected
    pub fn is_expected(&self) -> bool {
        !matches!(self, KernelError::System(_))
    }
}

impl From<std::io::Error> for KernelError {
    fn from(err: std::io::Error) -> Self {
        KernelError::System(SystemError::OperationFailed {
            reason: err.to_string(),
        })
    }
}

impl From<String> for KernelError {
    fn from(msg: String) -> Self {
        KernelError::System(SystemError::Internal(msg))
    }
}

impl From<&str> for KernelError {
    fn from(msg: &str) -> Self {
        KernelError::System(SystemError::Internal(msg.to_string()))
    }
}

/// Serializable error representation for API responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SerializableError {
    pub error_type: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&KernelError> for SerializableError {
    fn from(err: &KernelError) -> Self {
        SerializableError {
            error_type: err.kind(),
            message: err.to_string(),
            code: err.code().map(|c| c.to_string()),
        }
    }
}
