/*!
 * Validation Pipeline
 * Ordered, short-circuiting checks run before and after an operation body
 *
 * 1. Context: required fields present and well formed
 * 2. Security: authenticated, session fresh, permissions held, rate limit
 * 3. Input: field rules, then business rules against the current record
 * 4. Result: digest, success flag, required shape, result rules
 */

use super::rate_limit::RateLimiter;
use crate::core::clock::Clock;
use crate::core::config::KernelConfig;
use crate::core::errors::{IntegrityError, KernelResult, SecurityError, ValidationError};
use crate::core::limits::MAX_IDENTIFIER_LEN;
use crate::core::types::Record;
use crate::executor::{OperationDescriptor, OperationResult, SecurityContext};
use crate::permissions::PermissionChecker;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ValidationPipeline {
    checker: Arc<dyn PermissionChecker>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    session_max_age: Duration,
    clock_skew_tolerance: Duration,
}

impl ValidationPipeline {
    pub fn new(
        checker: Arc<dyn PermissionChecker>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
        config: &KernelConfig,
    ) -> Self {
        Self {
            checker,
            limiter,
            clock,
            session_max_age: config.session_max_age,
            clock_skew_tolerance: config.clock_skew_tolerance,
        }
    }

    /// Stages 1 to 3 in order
    pub fn validate_request(
        &self,
        descriptor: &OperationDescriptor,
        context: &SecurityContext,
        input: &Value,
        current: Option<&Record>,
    ) -> KernelResult<()> {
        self.validate_context(context)?;
        self.validate_security(descriptor, context)?;
        self.validate_input(descriptor, input, current)?;
        debug!(op_type = %descriptor.op_type, user = context.user(), "Request validated");
        Ok(())
    }

    /// Stage 1
    pub fn validate_context(&self, context: &SecurityContext) -> KernelResult<()> {
        identifier("user", Some(context.user()))?;
        identifier("resource", context.resource())?;
        // The action is descriptive; only checked when supplied
        if let Some(action) = context.action() {
            identifier("action", Some(action))?;
        }

        if let Some(source) = context.source() {
            if source.parse::<IpAddr>().is_err() {
                return Err(ValidationError::MalformedField {
                    field: "source".into(),
                    reason: format!("{} is not an IP address", source),
                }
                .into());
            }
        }

        let latest = self.clock.now() + self.clock_skew_tolerance;
        if context.timestamp() > latest {
            return Err(ValidationError::MalformedField {
                field: "timestamp".into(),
                reason: "request timestamp is in the future".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Stage 2
    pub fn validate_security(
        &self,
        descriptor: &OperationDescriptor,
        context: &SecurityContext,
    ) -> KernelResult<()> {
        let user = context.user().to_string();
        let authenticated_at = context
            .authenticated_at()
            .ok_or_else(|| SecurityError::Unauthenticated { user: user.clone() })?;

        let age = self
            .clock
            .now()
            .duration_since(authenticated_at)
            .unwrap_or(Duration::ZERO);
        if age > self.session_max_age {
            return Err(SecurityError::SessionExpired { user }.into());
        }

        if let Some(missing) = self
            .checker
            .missing_permission(&user, &descriptor.required_permissions)
        {
            return Err(SecurityError::PermissionDenied {
                user,
                permission: missing.to_string(),
            }
            .into());
        }

        if let Some(template) = &descriptor.rate_limit_key {
            let key = context.render(template, &descriptor.op_type);
            self.limiter.hit(&key)?;
        }
        Ok(())
    }

    /// Stage 3
    pub fn validate_input(
        &self,
        descriptor: &OperationDescriptor,
        input: &Value,
        current: Option<&Record>,
    ) -> KernelResult<()> {
        descriptor.input_rules.check(input, current)?;
        Ok(())
    }

    /// Post-execution stage
    pub fn validate_result(
        &self,
        descriptor: &OperationDescriptor,
        result: &OperationResult,
    ) -> KernelResult<()> {
        if !result.verify_digest() {
            return Err(IntegrityError::ResultDigestMismatch {
                operation: descriptor.op_type.clone(),
            }
            .into());
        }
        if !result.is_success() {
            return Err(ValidationError::OperationRejected {
                reason: result.failure_reason(),
            }
            .into());
        }

        for field in &descriptor.result_fields {
            if result.payload().get(field.as_str()).is_none() {
                return Err(ValidationError::InvalidResult {
                    reason: format!("missing field {}", field),
                }
                .into());
            }
        }

        descriptor
            .result_rules
            .check(result.payload(), None)
            .map_err(|e| ValidationError::InvalidResult {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

fn identifier(field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    let value = match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => {
            return Err(ValidationError::MissingField {
                field: field.to_string(),
            })
        }
    };
    if value.len() > MAX_IDENTIFIER_LEN || value.chars().any(char::is_control) {
        return Err(ValidationError::MalformedField {
            field: field.to_string(),
            reason: "too long or contains control characters".into(),
        });
    }
    Ok(())
}
