/*!
 * Core Module
 * Fundamental kernel types, configuration and error handling
 */

pub mod clock;
pub mod config;
pub mod errors;
pub mod guard;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use clock::{Clock, IdGenerator, ManualClock, RandomIdGenerator, SystemClock};
pub use config::{ConfigError, KernelConfig, RateLimitConfig, ThresholdConfig};
pub use errors::*;
pub use guard::{
    ExecutionState, Guard, GuardDrop, GuardError, GuardResult, Recoverable, TransactionGuard,
    TransactionState,
};
pub use types::*;
