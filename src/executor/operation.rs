/*!
 * Operations
 * Descriptors, results and the command interface executed by the kernel
 */

use super::scope::OperationScope;
use crate::core::errors::KernelResult;
use crate::core::types::Permission;
use crate::validation::{BusinessRule, FieldRule, InputRules};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Default rate-limit key: per user and operation type
pub const DEFAULT_RATE_LIMIT_KEY: &str = "{user}:{op}";

/// Static description of an operation, used for validation lookup,
/// rate limiting, caching and idempotency
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub op_type: String,
    pub required_permissions: Vec<Permission>,
    pub input_rules: InputRules,
    /// Key template; `None` disables rate limiting
    pub rate_limit_key: Option<String>,
    /// Result cache key template (read-only operations only)
    pub cache_key: Option<String>,
    pub idempotency_key: Option<String>,
    /// Read-only operations skip snapshots and still run in emergency mode
    pub mutating: bool,
    /// Payload fields a successful result must carry
    pub result_fields: Vec<String>,
    pub result_rules: InputRules,
}

impl OperationDescriptor {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            required_permissions: Vec::new(),
            input_rules: InputRules::new(),
            rate_limit_key: Some(DEFAULT_RATE_LIMIT_KEY.to_string()),
            cache_key: None,
            idempotency_key: None,
            mutating: true,
            result_fields: Vec::new(),
            result_rules: InputRules::new(),
        }
    }

    pub fn requires(mut self, permission: impl Into<Permission>) -> Self {
        self.required_permissions.push(permission.into());
        self
    }

    pub fn rule(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.input_rules = self.input_rules.field(field, rule);
        self
    }

    pub fn business_rule(mut self, rule: Arc<dyn BusinessRule>) -> Self {
        self.input_rules = self.input_rules.business(rule);
        self
    }

    pub fn rate_limit_key(mut self, template: impl Into<String>) -> Self {
        self.rate_limit_key = Some(template.into());
        self
    }

    pub fn without_rate_limit(mut self) -> Self {
        self.rate_limit_key = None;
        self
    }

    pub fn cache_key(mut self, template: impl Into<String>) -> Self {
        self.cache_key = Some(template.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.mutating = false;
        self
    }

    pub fn result_field(mut self, field: impl Into<String>) -> Self {
        self.result_fields.push(field.into());
        self
    }

    pub fn result_rule(mut self, rule: Arc<dyn BusinessRule>) -> Self {
        self.result_rules = self.result_rules.business(rule);
        self
    }
}

/// Validation status carried by a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Produced by the operation body, not yet checked
    Unverified,
    /// Passed result validation
    Verified,
    /// Served from the idempotency registry or result cache
    Replayed,
}

/// Immutable operation outcome
///
/// The digest covers `success` and `payload`; it is computed at
/// construction and re-checked before commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    success: bool,
    payload: Value,
    status: ValidationStatus,
    warnings: Vec<String>,
    digest: String,
}

impl OperationResult {
    pub fn success(payload: Value) -> Self {
        Self::new(true, payload)
    }

    /// Body-reported failure; rejected during result validation
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::new(false, serde_json::json!({ "error": reason.into() }))
    }

    fn new(success: bool, payload: Value) -> Self {
        let digest = digest(success, &payload);
        Self {
            success,
            payload,
            status: ValidationStatus::Unverified,
            warnings: Vec::new(),
            digest,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[inline]
    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether the digest still matches the content
    pub fn verify_digest(&self) -> bool {
        digest(self.success, &self.payload) == self.digest
    }

    /// Reason given by a failed result
    pub fn failure_reason(&self) -> String {
        self.payload
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "operation reported failure".to_string())
    }

    pub(crate) fn with_status(mut self, status: ValidationStatus) -> Self {
        self.status = status;
        self
    }
}

fn digest(success: bool, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update([success as u8]);
    // serde_json maps are ordered, so this encoding is canonical
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A protected command: type, payload and body
pub trait Operation: Send + Sync {
    fn descriptor(&self) -> &OperationDescriptor;

    /// Input checked by the descriptor's rules
    fn input(&self) -> &Value;

    /// Run the body inside the kernel's transaction
    fn execute(&self, scope: &mut OperationScope<'_>) -> KernelResult<OperationResult>;
}
