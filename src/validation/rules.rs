/*!
 * Validation Rules
 * Field-level rules and cross-field business rules
 */

use crate::core::errors::ValidationError;
use crate::core::types::Record;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// JSON type expected by [`FieldRule::Type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Number,
    Integer,
    Bool,
    Object,
    Array,
}

impl JsonType {
    fn matches(self, value: &Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Integer => value.is_i64() || value.is_u64(),
            JsonType::Bool => value.is_boolean(),
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Bool => "bool",
            JsonType::Object => "object",
            JsonType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Single-field rule
///
/// Every rule except `Required` passes when the field is absent.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    Required,
    Type(JsonType),
    /// Minimum length of a string (chars) or array
    MinLength(usize),
    /// Maximum length of a string (chars) or array
    MaxLength(usize),
    /// Inclusive numeric range
    Range { min: f64, max: f64 },
    /// Value must equal one of these
    OneOf(Vec<Value>),
    /// Non-empty string without control characters, at most `max` chars
    Identifier { max: usize },
}

impl FieldRule {
    fn name(&self) -> String {
        match self {
            FieldRule::Required => "required".into(),
            FieldRule::Type(t) => format!("type:{}", t),
            FieldRule::MinLength(n) => format!("min_length:{}", n),
            FieldRule::MaxLength(n) => format!("max_length:{}", n),
            FieldRule::Range { min, max } => format!("range:{}..={}", min, max),
            FieldRule::OneOf(values) => format!("one_of:{}", values.len()),
            FieldRule::Identifier { max } => format!("identifier:{}", max),
        }
    }

    /// Check `value` (None when the field is absent)
    pub fn check(&self, field: &str, value: Option<&Value>) -> Result<(), ValidationError> {
        let value = match (self, value) {
            (FieldRule::Required, None) | (FieldRule::Required, Some(Value::Null)) => {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                })
            }
            (_, None) => return Ok(()),
            (_, Some(value)) => value,
        };

        let ok = match self {
            FieldRule::Required => true,
            FieldRule::Type(t) => t.matches(value),
            FieldRule::MinLength(n) => length(value).map_or(false, |len| len >= *n),
            FieldRule::MaxLength(n) => length(value).map_or(false, |len| len <= *n),
            FieldRule::Range { min, max } => value
                .as_f64()
                .map_or(false, |v| v >= *min && v <= *max),
            FieldRule::OneOf(values) => values.contains(value),
            FieldRule::Identifier { max } => value.as_str().map_or(false, |s| {
                !s.trim().is_empty()
                    && s.chars().count() <= *max
                    && !s.chars().any(char::is_control)
            }),
        };

        if ok {
            Ok(())
        } else {
            Err(ValidationError::RuleViolation {
                field: field.to_string(),
                rule: self.name(),
            })
        }
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

/// Cross-field rule evaluated against the input and the current record
pub trait BusinessRule: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries a human-readable reason
    fn check(&self, input: &Value, current: Option<&Record>) -> Result<(), String>;
}

/// Legal transitions of a state field, e.g. `draft -> review -> published`
#[derive(Debug, Clone)]
pub struct StateTransitionRule {
    field: String,
    initial: BTreeSet<String>,
    transitions: BTreeMap<String, BTreeSet<String>>,
}

impl StateTransitionRule {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            initial: BTreeSet::new(),
            transitions: BTreeMap::new(),
        }
    }

    /// States allowed when no record exists yet
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial.insert(state.into());
        self
    }

    pub fn allow(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions
            .entry(from.into())
            .or_default()
            .insert(to.into());
        self
    }
}

impl BusinessRule for StateTransitionRule {
    fn name(&self) -> &str {
        "state_transition"
    }

    fn check(&self, input: &Value, current: Option<&Record>) -> Result<(), String> {
        let target = match input.get(&self.field).and_then(Value::as_str) {
            Some(target) => target,
            // Not changing state
            None => return Ok(()),
        };
        let from = current
            .and_then(|record| record.get(&self.field))
            .and_then(Value::as_str);

        match from {
            None if self.initial.is_empty() || self.initial.contains(target) => Ok(()),
            None => Err(format!("{} is not a valid initial {}", target, self.field)),
            Some(from) if from == target => Ok(()),
            Some(from) => match self.transitions.get(from) {
                Some(allowed) if allowed.contains(target) => Ok(()),
                _ => Err(format!("{} cannot move from {} to {}", self.field, from, target)),
            },
        }
    }
}

/// Rule set attached to an operation descriptor
#[derive(Clone, Default)]
pub struct InputRules {
    fields: Vec<(String, FieldRule)>,
    business: Vec<Arc<dyn BusinessRule>>,
}

impl InputRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((name.into(), rule));
        self
    }

    pub fn business(mut self, rule: Arc<dyn BusinessRule>) -> Self {
        self.business.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.business.is_empty()
    }

    /// Field rules in declaration order, then business rules
    pub fn check(&self, input: &Value, current: Option<&Record>) -> Result<(), ValidationError> {
        for (field, rule) in &self.fields {
            rule.check(field, input.get(field.as_str()))?;
        }
        for rule in &self.business {
            rule.check(input, current)
                .map_err(|reason| ValidationError::BusinessRule {
                    rule: rule.name().to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for InputRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputRules")
            .field("fields", &self.fields)
            .field(
                "business",
                &self.business.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
