/*!
 * Permission Types
 * Roles, role creation payloads and grant matching
 */

use crate::core::types::{Permission, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persisted role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    /// Directly granted permissions
    pub permissions: BTreeSet<Permission>,
    /// Parent roles, in declaration order
    pub parents: Vec<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Role {
    pub fn grants_directly(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|granted| permission_matches(granted, permission))
    }
}

/// Payload for creating a role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleData {
    pub id: RoleId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub parents: Vec<RoleId>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RoleData {
    pub fn new(id: impl Into<RoleId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<Permission>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_parent(mut self, parent: impl Into<RoleId>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn into_role(self) -> Role {
        let mut parents: Vec<RoleId> = Vec::with_capacity(self.parents.len());
        for parent in self.parents {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        Role {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            permissions: self.permissions.into_iter().collect(),
            parents,
            description: self.description,
        }
    }
}

/// Whether a granted permission covers a requested one
///
/// `*` matches everything; `content.*` matches any `content.<x>`.
pub fn permission_matches(granted: &str, requested: &str) -> bool {
    if granted == "*" || granted == requested {
        return true;
    }
    match granted.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') => {
            requested.len() > prefix.len() && requested.starts_with(prefix)
        }
        _ => false,
    }
}
