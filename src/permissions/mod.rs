/*!
 * Permissions Module
 * Role-based access control with role inheritance
 *
 * ## Features
 * - Roles grant permissions directly and through parent roles
 * - Iterative BFS over an arena snapshot with a depth bound
 * - Cycle check before every parent assignment
 * - Decisions cached per (user, permission, policy version); every
 *   mutation evicts affected users before it returns
 * - Wildcard grants (`content.*`, `*`)
 *
 * ## Usage
 * ```ignore
 * resolver.create_role(RoleData::new("viewer").with_permission("content.read"))?;
 * resolver.create_role(RoleData::new("editor").with_parent("viewer"))?;
 * resolver.assign_role("alice", "editor")?;
 * assert!(resolver.check_permission("alice", "content.read"));
 * ```
 */

pub mod graph;
pub mod resolver;
pub mod store;
pub mod types;

pub use graph::{Resolution, RoleGraph};
pub use resolver::{policy_tag, user_tag, PermissionChecker, PermissionResolver};
pub use store::{MemoryPermissionStore, PermissionStore};
pub use types::{permission_matches, Role, RoleData};
