/*!
 * Validation Module
 * Context, security, input and result checks for protected operations
 */

pub mod pipeline;
pub mod rate_limit;
pub mod rules;

pub use pipeline::ValidationPipeline;
pub use rate_limit::RateLimiter;
pub use rules::{BusinessRule, FieldRule, InputRules, JsonType, StateTransitionRule};
