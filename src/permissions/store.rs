/*!
 * Permission Store
 * Persisted roles and role memberships
 */

use super::types::Role;
use crate::core::errors::KernelResult;
use crate::core::types::{RoleId, UserId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// Persistence for roles and user-role memberships
///
/// The resolver serializes all mutations, so implementations only need
/// per-call atomicity.
pub trait PermissionStore: Send + Sync {
    fn role(&self, id: &str) -> KernelResult<Option<Role>>;

    fn roles(&self) -> KernelResult<Vec<Role>>;

    /// Insert or replace a role
    fn save_role(&self, role: Role) -> KernelResult<()>;

    fn remove_role(&self, id: &str) -> KernelResult<Option<Role>>;

    /// All memberships, keyed by user
    fn assignments(&self) -> KernelResult<BTreeMap<UserId, BTreeSet<RoleId>>>;

    /// Returns false if the user already held the role
    fn assign(&self, user: &str, role: &str) -> KernelResult<bool>;

    /// Returns false if the user did not hold the role
    fn unassign(&self, user: &str, role: &str) -> KernelResult<bool>;
}

#[derive(Default)]
struct Tables {
    roles: BTreeMap<RoleId, Role>,
    memberships: BTreeMap<UserId, BTreeSet<RoleId>>,
}

/// In-memory permission store
#[derive(Default)]
pub struct MemoryPermissionStore {
    tables: RwLock<Tables>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn role(&self, id: &str) -> KernelResult<Option<Role>> {
        Ok(self.tables.read().roles.get(id).cloned())
    }

    fn roles(&self) -> KernelResult<Vec<Role>> {
        Ok(self.tables.read().roles.values().cloned().collect())
    }

    fn save_role(&self, role: Role) -> KernelResult<()> {
        self.tables.write().roles.insert(role.id.clone(), role);
        Ok(())
    }

    fn remove_role(&self, id: &str) -> KernelResult<Option<Role>> {
        let mut tables = self.tables.write();
        let removed = tables.roles.remove(id);
        if removed.is_some() {
            for roles in tables.memberships.values_mut() {
                roles.remove(id);
            }
            tables.memberships.retain(|_, roles| !roles.is_empty());
        }
        Ok(removed)
    }

    fn assignments(&self) -> KernelResult<BTreeMap<UserId, BTreeSet<RoleId>>> {
        Ok(self.tables.read().memberships.clone())
    }

    fn assign(&self, user: &str, role: &str) -> KernelResult<bool> {
        Ok(self
            .tables
            .write()
            .memberships
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string()))
    }

    fn unassign(&self, user: &str, role: &str) -> KernelResult<bool> {
        let mut tables = self.tables.write();
        let removed = match tables.memberships.get_mut(user) {
            Some(roles) => roles.remove(role),
            None => false,
        };
        if tables.memberships.get(user).map_or(false, |r| r.is_empty()) {
            tables.memberships.remove(user);
        }
        Ok(removed)
    }
}
