/*!
 * Permission Resolver
 * Role-based permission checks with inheritance and cached decisions
 */

use super::graph::{Resolution, RoleGraph};
use super::store::PermissionStore;
use super::types::{Role, RoleData};
use crate::cache::{compose_key, CacheLayer};
use crate::core::errors::{KernelResult, SecurityError, ValidationError};
use crate::core::limits::{MAX_IDENTIFIER_LEN, MAX_ROLE_DEPTH, PERMISSION_CACHE_TTL};
use crate::core::types::{Permission, RoleId, UserId};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Permission checking interface consumed by the validation pipeline
pub trait PermissionChecker: Send + Sync {
    /// Check if `user` holds `permission`
    fn check_permission(&self, user: &str, permission: &str) -> bool;

    /// First permission in `required` the user lacks
    fn missing_permission<'a>(&self, user: &str, required: &'a [Permission]) -> Option<&'a str> {
        required
            .iter()
            .find(|p| !self.check_permission(user, p))
            .map(String::as_str)
    }
}

/// Cache tag covering every decision cached for a user
pub fn user_tag(user: &str) -> String {
    compose_key("user", &[user])
}

/// Cache tag covering every decision cached under a policy version
pub fn policy_tag(version: u64) -> String {
    format!("policy:v{}", version)
}

/// RBAC resolver
///
/// Reads go through a published `RoleGraph` snapshot and never lock.
/// Mutations are serialized, persisted, then published as a new snapshot
/// with a bumped policy version; affected users' cached decisions are
/// evicted before the mutation returns.
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
    cache: Arc<CacheLayer>,
    graph: ArcSwap<RoleGraph>,
    mutation: Mutex<()>,
    max_depth: usize,
    cache_ttl: Duration,
    truncations: AtomicU64,
}

impl PermissionResolver {
    /// Create a resolver and publish the store's current policy
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<CacheLayer>) -> KernelResult<Self> {
        let resolver = Self {
            store,
            cache,
            graph: ArcSwap::from_pointee(RoleGraph::empty()),
            mutation: Mutex::new(()),
            max_depth: MAX_ROLE_DEPTH,
            cache_ttl: PERMISSION_CACHE_TTL,
            truncations: AtomicU64::new(0),
        };
        resolver.publish()?;
        Ok(resolver)
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Current policy version
    pub fn policy_version(&self) -> u64 {
        self.graph.load().version()
    }

    /// Current published snapshot
    pub fn graph(&self) -> Arc<RoleGraph> {
        self.graph.load_full()
    }

    /// Permission walks cut short by the depth bound
    pub fn truncation_count(&self) -> u64 {
        self.truncations.load(Ordering::Relaxed)
    }

    /// Check a permission, served from cache when possible
    pub fn check_permission(&self, user: &str, permission: &str) -> bool {
        let graph = self.graph.load_full();
        let version = graph.version();
        let key = compose_key("perm", &[user, permission, &version.to_string()]);
        let tags = [user_tag(user), policy_tag(version)];

        self.cache
            .remember_tagged(&key, self.cache_ttl, &tags, || {
                Ok::<_, Infallible>(self.evaluate(&graph, user, permission))
            })
            .unwrap_or_else(|never| match never {})
    }

    fn evaluate(&self, graph: &RoleGraph, user: &str, permission: &str) -> bool {
        let (granted, truncated) = graph.grants(user, permission, self.max_depth);
        if truncated && !granted {
            self.truncations.fetch_add(1, Ordering::Relaxed);
            warn!(
                user,
                permission,
                max_depth = self.max_depth,
                "Role hierarchy deeper than limit, returning partial result"
            );
        }
        debug!(user, permission, granted, "Permission evaluated");
        granted
    }

    /// Roles directly assigned to `user`
    pub fn user_roles(&self, user: &str) -> Vec<RoleId> {
        self.graph.load().user_roles(user)
    }

    /// All permissions `user` holds, including inherited grants
    pub fn effective_permissions(&self, user: &str) -> BTreeSet<Permission> {
        self.resolve(user).permissions
    }

    /// Full closure walk for `user`
    pub fn resolve(&self, user: &str) -> Resolution {
        let resolution = self.graph.load().resolve(user, self.max_depth);
        if resolution.truncated {
            self.truncations.fetch_add(1, Ordering::Relaxed);
            warn!(user, max_depth = self.max_depth, "Role closure truncated");
        }
        resolution
    }

    pub fn role(&self, id: &str) -> Option<Role> {
        self.graph.load().role(id).cloned()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.graph.load().roles().cloned().collect()
    }

    /// Whether `proposed_parent` can become a parent of `role` without a cycle
    pub fn validate_role_hierarchy(&self, role: &str, proposed_parent: &str) -> bool {
        !self.graph.load().would_cycle(role, proposed_parent)
    }

    /// Create a role; parents must exist and may not form a cycle
    pub fn create_role(&self, data: RoleData) -> KernelResult<Role> {
        check_identifier("role.id", &data.id)?;
        for permission in &data.permissions {
            check_identifier("role.permissions", permission)?;
        }

        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();

        if graph.contains(&data.id) {
            return Err(ValidationError::BusinessRule {
                rule: "unique_role_id".into(),
                reason: format!("role {} already exists", data.id),
            }
            .into());
        }
        for parent in &data.parents {
            if parent == &data.id {
                return Err(cycle(&data.id, parent));
            }
            ensure_role(&graph, parent)?;
        }

        let role = data.into_role();
        self.store.save_role(role.clone())?;
        // A new role has no members or children yet
        self.publish_and_evict(&graph, BTreeSet::new())?;

        info!(role = %role.id, parents = ?role.parents, "Role created");
        Ok(role)
    }

    /// Give `user` a role
    pub fn assign_role(&self, user: &str, role: &str) -> KernelResult<()> {
        check_identifier("user", user)?;
        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();
        ensure_role(&graph, role)?;

        if self.store.assign(user, role)? {
            self.publish_and_evict_users(&graph, [user.to_string()])?;
            info!(user, role, "Role assigned");
        }
        Ok(())
    }

    /// Take a role from `user`
    pub fn revoke_role(&self, user: &str, role: &str) -> KernelResult<bool> {
        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();

        let removed = self.store.unassign(user, role)?;
        if removed {
            self.publish_and_evict_users(&graph, [user.to_string()])?;
            info!(user, role, "Role revoked");
        }
        Ok(removed)
    }

    /// Attach `parent` to `role`, rejecting any edge that would close a cycle
    pub fn add_role_parent(&self, role: &str, parent: &str) -> KernelResult<()> {
        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();
        let mut current = ensure_role(&graph, role)?.clone();
        ensure_role(&graph, parent)?;

        if graph.would_cycle(role, parent) {
            warn!(role, parent, "Rejected role parent: would create cycle");
            return Err(cycle(role, parent));
        }
        if current.parents.iter().any(|p| p == parent) {
            return Ok(());
        }

        current.parents.push(parent.to_string());
        self.store.save_role(current)?;
        self.publish_and_evict(&graph, graph.descendants(role))?;

        info!(role, parent, "Role parent added");
        Ok(())
    }

    pub fn remove_role_parent(&self, role: &str, parent: &str) -> KernelResult<bool> {
        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();
        let mut current = ensure_role(&graph, role)?.clone();

        let before = current.parents.len();
        current.parents.retain(|p| p != parent);
        if current.parents.len() == before {
            return Ok(false);
        }

        self.store.save_role(current)?;
        self.publish_and_evict(&graph, graph.descendants(role))?;
        info!(role, parent, "Role parent removed");
        Ok(true)
    }

    pub fn grant_permission(&self, role: &str, permission: &str) -> KernelResult<()> {
        check_identifier("permission", permission)?;
        self.update_permissions(role, |set| set.insert(permission.to_string()))
            .map(|_| ())
    }

    pub fn revoke_permission(&self, role: &str, permission: &str) -> KernelResult<bool> {
        self.update_permissions(role, |set| set.remove(permission))
    }

    fn update_permissions<F>(&self, role: &str, change: F) -> KernelResult<bool>
    where
        F: FnOnce(&mut BTreeSet<Permission>) -> bool,
    {
        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();
        let mut current = ensure_role(&graph, role)?.clone();

        if !change(&mut current.permissions) {
            return Ok(false);
        }
        self.store.save_role(current)?;
        self.publish_and_evict(&graph, graph.descendants(role))?;
        debug!(role, "Role permissions updated");
        Ok(true)
    }

    /// Delete a role, detaching it from children and members
    pub fn delete_role(&self, role: &str) -> KernelResult<bool> {
        let _guard = self.mutation.lock();
        let graph = self.graph.load_full();
        if !graph.contains(role) {
            return Ok(false);
        }
        let affected = graph.descendants(role);

        for child in graph.roles().filter(|r| r.parents.iter().any(|p| p == role)) {
            let mut child = child.clone();
            child.parents.retain(|p| p != role);
            self.store.save_role(child)?;
        }
        self.store.remove_role(role)?;
        self.publish_and_evict(&graph, affected)?;

        info!(role, "Role deleted");
        Ok(true)
    }

    /// Rebuild and publish the snapshot from the store
    fn publish(&self) -> KernelResult<Arc<RoleGraph>> {
        let version = self.graph.load().version() + 1;
        let graph = Arc::new(RoleGraph::build(
            self.store.roles()?,
            self.store.assignments()?,
            version,
        ));
        if graph.has_cycle() {
            warn!(version, "Published role graph contains a cycle");
        }
        self.graph.store(graph.clone());
        Ok(graph)
    }

    /// Publish, then evict decisions of users holding any of `roles`
    ///
    /// Holders are taken from both snapshots so revoked members are
    /// evicted as well as new ones.
    fn publish_and_evict(&self, previous: &RoleGraph, roles: BTreeSet<RoleId>) -> KernelResult<()> {
        let published = self.publish()?;
        let mut users: BTreeSet<UserId> = previous.users_holding(&roles).into_iter().collect();
        users.extend(published.users_holding(&roles));
        self.evict(previous.version(), users);
        Ok(())
    }

    fn publish_and_evict_users<I>(&self, previous: &RoleGraph, users: I) -> KernelResult<()>
    where
        I: IntoIterator<Item = UserId>,
    {
        self.publish()?;
        self.evict(previous.version(), users);
        Ok(())
    }

    fn evict<I>(&self, previous_version: u64, users: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        let mut evicted = 0;
        for user in users {
            evicted += self.cache.invalidate_tag(&user_tag(&user));
        }
        evicted += self.cache.invalidate_tag(&policy_tag(previous_version));
        debug!(
            previous_version,
            version = self.policy_version(),
            evicted,
            "Permission cache evicted"
        );
    }
}

impl PermissionChecker for PermissionResolver {
    fn check_permission(&self, user: &str, permission: &str) -> bool {
        PermissionResolver::check_permission(self, user, permission)
    }
}

fn ensure_role<'g>(graph: &'g RoleGraph, role: &str) -> KernelResult<&'g Role> {
    graph.role(role).ok_or_else(|| {
        ValidationError::UnknownReference {
            kind: "role".into(),
            id: role.to_string(),
        }
        .into()
    })
}

fn cycle(role: &str, parent: &str) -> crate::core::errors::KernelError {
    SecurityError::HierarchyCycle {
        role: role.to_string(),
        parent: parent.to_string(),
    }
    .into()
}

fn check_identifier(field: &str, value: &str) -> KernelResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        }
        .into());
    }
    if value.len() > MAX_IDENTIFIER_LEN || value.chars().any(char::is_control) {
        return Err(ValidationError::MalformedField {
            field: field.to_string(),
            reason: "identifier too long or contains control characters".into(),
        }
        .into());
    }
    Ok(())
}
