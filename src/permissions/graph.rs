/*!
 * Role Graph
 * Immutable arena snapshot of roles, inheritance edges and memberships
 *
 * Roles live in a `Vec` arena addressed by index; edges are index lists.
 * All traversals are iterative BFS over a visited bitmap, so they terminate
 * on any input, including graphs that were corrupted with a cycle.
 */

use super::types::Role;
use crate::core::types::{Permission, RoleId, UserId};
use ahash::RandomState;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::warn;

#[derive(Debug, Clone)]
struct RoleNode {
    role: Role,
    parents: Vec<usize>,
    children: Vec<usize>,
}

/// Outcome of a closure walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Roles reached, in BFS order
    pub roles: Vec<RoleId>,
    pub permissions: BTreeSet<Permission>,
    /// True if some parent lay beyond the depth bound and was skipped
    pub truncated: bool,
}

/// Published policy snapshot
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    nodes: Vec<RoleNode>,
    index: HashMap<RoleId, usize, RandomState>,
    members: HashMap<UserId, Vec<usize>, RandomState>,
    version: u64,
}

impl RoleGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot; edges and memberships naming unknown roles are
    /// dropped with a warning
    pub fn build(
        roles: Vec<Role>,
        memberships: BTreeMap<UserId, BTreeSet<RoleId>>,
        version: u64,
    ) -> Self {
        let mut index = HashMap::with_capacity_and_hasher(roles.len(), RandomState::new());
        let mut nodes: Vec<RoleNode> = Vec::with_capacity(roles.len());

        for role in roles {
            index.insert(role.id.clone(), nodes.len());
            nodes.push(RoleNode {
                role,
                parents: Vec::new(),
                children: Vec::new(),
            });
        }

        for child in 0..nodes.len() {
            let parent_ids = nodes[child].role.parents.clone();
            for parent_id in parent_ids {
                match index.get(&parent_id) {
                    Some(&parent) => {
                        nodes[child].parents.push(parent);
                        nodes[parent].children.push(child);
                    }
                    None => warn!(
                        role = %nodes[child].role.id,
                        parent = %parent_id,
                        "Ignoring edge to unknown parent role"
                    ),
                }
            }
        }

        let mut members = HashMap::with_hasher(RandomState::new());
        for (user, role_ids) in memberships {
            let held: Vec<usize> = role_ids
                .iter()
                .filter_map(|id| index.get(id).copied())
                .collect();
            if held.len() != role_ids.len() {
                warn!(user = %user, "Ignoring membership in unknown role");
            }
            if !held.is_empty() {
                members.insert(user, held);
            }
        }

        Self {
            nodes,
            index,
            members,
            version,
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.index.contains_key(role)
    }

    pub fn role(&self, role: &str) -> Option<&Role> {
        self.index.get(role).map(|&i| &self.nodes[i].role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.nodes.iter().map(|n| &n.role)
    }

    /// Roles directly assigned to `user`
    pub fn user_roles(&self, user: &str) -> Vec<RoleId> {
        self.members
            .get(user)
            .map(|held| held.iter().map(|&i| self.nodes[i].role.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Users holding any of `roles` directly
    pub fn users_holding(&self, roles: &BTreeSet<RoleId>) -> Vec<UserId> {
        self.members
            .iter()
            .filter(|(_, held)| held.iter().any(|&i| roles.contains(&self.nodes[i].role.id)))
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Transitive closure of `user`'s roles, up to `max_depth` parent hops
    pub fn resolve(&self, user: &str, max_depth: usize) -> Resolution {
        let roots = self.members.get(user).cloned().unwrap_or_default();
        self.walk_up(&roots, max_depth, |_| false)
    }

    /// Whether `user` holds `permission`, stopping at the first match
    ///
    /// Returns the answer plus whether the depth bound cut the walk short.
    pub fn grants(&self, user: &str, permission: &str, max_depth: usize) -> (bool, bool) {
        let roots = match self.members.get(user) {
            Some(roots) => roots.clone(),
            None => return (false, false),
        };
        let mut found = false;
        let resolution = self.walk_up(&roots, max_depth, |node| {
            found = node.role.grants_directly(permission);
            found
        });
        (found, resolution.truncated)
    }

    fn walk_up<F>(&self, roots: &[usize], max_depth: usize, mut stop: F) -> Resolution
    where
        F: FnMut(&RoleNode) -> bool,
    {
        let mut visited = vec![false; self.nodes.len()];
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
        let mut resolution = Resolution::default();

        for &root in roots {
            if !visited[root] {
                visited[root] = true;
                queue.push_back((root, 0));
            }
        }

        while let Some((current, depth)) = queue.pop_front() {
            let node = &self.nodes[current];
            resolution.roles.push(node.role.id.clone());
            resolution
                .permissions
                .extend(node.role.permissions.iter().cloned());

            if stop(node) {
                break;
            }

            for &parent in &node.parents {
                if visited[parent] {
                    continue;
                }
                if depth + 1 > max_depth {
                    resolution.truncated = true;
                    continue;
                }
                visited[parent] = true;
                queue.push_back((parent, depth + 1));
            }
        }

        resolution
    }

    /// Would attaching `proposed_parent` as a parent of `role` close a cycle
    ///
    /// BFS upward from the proposed parent through existing parent links;
    /// reaching `role` means the edge would close a loop. Bounded only by
    /// the visited set, never by depth.
    pub fn would_cycle(&self, role: &str, proposed_parent: &str) -> bool {
        if role == proposed_parent {
            return true;
        }
        let (Some(&target), Some(&start)) = (self.index.get(role), self.index.get(proposed_parent))
        else {
            return false;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;

        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            for &parent in &self.nodes[current].parents {
                if !visited[parent] {
                    visited[parent] = true;
                    queue.push_back(parent);
                }
            }
        }
        false
    }

    /// `role` plus every role that inherits from it
    pub fn descendants(&self, role: &str) -> BTreeSet<RoleId> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.index.get(role) else {
            return found;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;

        while let Some(current) = queue.pop_front() {
            found.insert(self.nodes[current].role.id.clone());
            for &child in &self.nodes[current].children {
                if !visited[child] {
                    visited[child] = true;
                    queue.push_back(child);
                }
            }
        }
        found
    }

    /// Whether the published edges contain any cycle
    pub fn has_cycle(&self) -> bool {
        // Kahn's algorithm: a cycle leaves nodes with nonzero in-degree
        let mut pending: Vec<usize> = self.nodes.iter().map(|n| n.parents.len()).collect();
        let mut queue: VecDeque<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut seen = 0;

        while let Some(current) = queue.pop_front() {
            seen += 1;
            for &child in &self.nodes[current].children {
                pending[child] -= 1;
                if pending[child] == 0 {
                    queue.push_back(child);
                }
            }
        }
        seen != self.nodes.len()
    }
}
