/*!
 * Operation Executor
 * The protective envelope around arbitrary operations
 *
 * ## Usage
 * ```ignore
 * let kernel = KernelBuilder::new().with_config(config).build()?;
 * let context = SecurityContext::builder("alice")
 *     .resource("doc-1")
 *     .authenticated_at(now)
 *     .build();
 * let result = kernel.execute_critical(&PublishDocument::new(input), &context)?;
 * ```
 */

mod builder;
mod context;
mod idempotency;
mod kernel;
mod operation;
mod scope;

pub use builder::{Kernel, KernelBuilder};
pub use context::{ContextSummary, SecurityContext, SecurityContextBuilder};
pub use idempotency::{Claim, ClaimGuard, IdempotencyRegistry};
pub use kernel::OperationExecutor;
pub use operation::{
    Operation, OperationDescriptor, OperationResult, ValidationStatus, DEFAULT_RATE_LIMIT_KEY,
};
pub use scope::OperationScope;
