/*!
 * System Limits and Constants
 *
 * Defaults for every tunable in `KernelConfig`, grouped by domain.
 * - Security-critical constants are marked with [SECURITY]
 * - Performance-critical constants are marked with [PERF]
 */

use std::time::Duration;

// =============================================================================
// PERMISSION RESOLUTION
// =============================================================================

/// Maximum role inheritance depth walked during permission resolution
/// [SECURITY] Bounds traversal of pathological role graphs
pub const MAX_ROLE_DEPTH: usize = 16;

/// TTL for cached permission decisions
pub const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(300);

// =============================================================================
// CACHE
// =============================================================================

/// Default TTL for `remember` when the caller has no opinion
pub const CACHE_DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Entries held by the default in-memory cache store before eviction
/// [PERF]
pub const CACHE_MAX_ENTRIES: usize = 100_000;

/// Length of generated HMAC secrets
/// [SECURITY] Matches the SHA-256 block output
pub const CACHE_SECRET_LEN: usize = 32;

// =============================================================================
// VALIDATION
// =============================================================================

/// Requests allowed per identity and operation type per window
pub const RATE_LIMIT_MAX_REQUESTS: u64 = 60;

/// Fixed rate-limit window
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Maximum age of an authentication before it is considered expired
/// [SECURITY]
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(8 * 60 * 60);

/// Tolerated clock skew for context timestamps in the future
pub const CLOCK_SKEW_TOLERANCE: Duration = Duration::from_secs(30);

/// Maximum length for identifiers in a security context
pub const MAX_IDENTIFIER_LEN: usize = 256;

// =============================================================================
// EXECUTION
// =============================================================================

/// Row lock acquisition timeout
/// [SECURITY] Lock waits beyond this abort the operation instead of blocking
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which a repeated idempotency key replays the prior result
pub const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Calls between lazy sweeps of ended rate windows and expired
/// idempotency slots
/// [PERF]
pub const PURGE_INTERVAL: u64 = 256;

// =============================================================================
// MONITORING
// =============================================================================

/// Slow operation threshold
pub const MAX_OPERATION_DURATION: Duration = Duration::from_secs(2);

/// Resident memory threshold sampled at execution time (512MB)
pub const MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Process CPU usage threshold, percent of one core
pub const MAX_CPU_PERCENT: f64 = 90.0;

/// Audit records kept in the in-memory ring buffer
pub const MAX_AUDIT_EVENTS: usize = 10_000;

/// Audit records kept per user
pub const MAX_AUDIT_EVENTS_PER_USER: usize = 256;

/// Bounded queue between the executor and the audit worker
/// [PERF] Full queue diverts to the fallback channel instead of blocking
pub const AUDIT_QUEUE_CAPACITY: usize = 4_096;

/// Bounded queue for asynchronous alerts
pub const ALERT_QUEUE_CAPACITY: usize = 1_024;
