/*!
 * Security Context
 * Immutable per-request identity and target
 */

use crate::cache::push_key_part;
use crate::core::types::{ResourceId, RoleId, UserId};
use crate::permissions::PermissionResolver;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::SystemTime;

/// Who is acting on what
///
/// Built once per request and never mutated; the acting role set is
/// resolved on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    user: UserId,
    resource: Option<ResourceId>,
    action: Option<String>,
    source: Option<String>,
    timestamp: SystemTime,
    authenticated_at: Option<SystemTime>,
    #[serde(skip)]
    roles: OnceLock<Vec<RoleId>>,
}

impl SecurityContext {
    pub fn builder(user: impl Into<UserId>) -> SecurityContextBuilder {
        SecurityContextBuilder {
            user: user.into(),
            resource: None,
            action: None,
            source: None,
            timestamp: None,
            authenticated_at: None,
        }
    }

    #[inline]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[inline]
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    #[inline]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Client address as supplied by the caller
    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[inline]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    #[inline]
    pub fn authenticated_at(&self) -> Option<SystemTime> {
        self.authenticated_at
    }

    /// Roles held by the user, resolved once
    pub fn acting_roles(&self, resolver: &PermissionResolver) -> &[RoleId] {
        self.roles.get_or_init(|| resolver.user_roles(&self.user))
    }

    /// Expand `{user}`, `{resource}`, `{action}` and `{op}` in a key template
    ///
    /// Substitution is a single pass and each value is length-prefixed, so
    /// separators or placeholder text inside identifiers cannot make two
    /// contexts render the same key. Unknown placeholders are kept as text.
    pub fn render(&self, template: &str, op_type: &str) -> String {
        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let field = tail.find('}').and_then(|close| {
                let value = match &tail[1..close] {
                    "user" => Some(self.user.as_str()),
                    "resource" => Some(self.resource.as_deref().unwrap_or("")),
                    "action" => Some(self.action.as_deref().unwrap_or("")),
                    "op" => Some(op_type),
                    _ => None,
                };
                value.map(|value| (value, close))
            });

            match field {
                Some((value, close)) => {
                    push_key_part(&mut out, value);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            user: self.user.clone(),
            roles: Vec::new(),
            resource: self.resource.clone(),
            action: self.action.clone(),
            source: self.source.clone(),
        }
    }

    /// Summary carrying the acting role set
    pub fn audit_summary(&self, resolver: &PermissionResolver) -> ContextSummary {
        ContextSummary {
            roles: self.acting_roles(resolver).to_vec(),
            ..self.summary()
        }
    }
}

/// Audit-safe subset of a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub user: UserId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Builder for [`SecurityContext`]
///
/// Nothing is checked here; structural validation is the pipeline's first
/// stage.
#[derive(Debug, Clone)]
pub struct SecurityContextBuilder {
    user: UserId,
    resource: Option<ResourceId>,
    action: Option<String>,
    source: Option<String>,
    timestamp: Option<SystemTime>,
    authenticated_at: Option<SystemTime>,
}

impl SecurityContextBuilder {
    pub fn resource(mut self, resource: impl Into<ResourceId>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Request time; defaults to the wall clock at `build`
    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn authenticated_at(mut self, at: SystemTime) -> Self {
        self.authenticated_at = Some(at);
        self
    }

    pub fn build(self) -> SecurityContext {
        SecurityContext {
            user: self.user,
            resource: self.resource,
            action: self.action,
            source: self.source,
            timestamp: self.timestamp.unwrap_or_else(SystemTime::now),
            authenticated_at: self.authenticated_at,
            roles: OnceLock::new(),
        }
    }
}
