/*!
 * Cached permission decisions track policy changes
 */

use opguard_kernel::cache::{CacheLayer, KeyedHasher, MemoryCacheStore};
use opguard_kernel::permissions::user_tag;
use opguard_kernel::{ManualClock, MemoryPermissionStore, PermissionResolver, RoleData};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    rbac: PermissionResolver,
    cache: Arc<CacheLayer>,
}

/// `viewer <- editor`, with `alice` holding `editor`
fn fixture() -> Fixture {
    let cache = Arc::new(CacheLayer::new(
        Arc::new(MemoryCacheStore::new(10_000)),
        KeyedHasher::new(b"invalidation-tests-secret-0123").unwrap(),
        Arc::new(ManualClock::at_unix(1_700_000_000)),
        Duration::from_secs(600),
    ));
    let rbac = PermissionResolver::new(Arc::new(MemoryPermissionStore::new()), cache.clone())
        .unwrap()
        .with_cache_ttl(Duration::from_secs(3600));

    rbac.create_role(RoleData::new("viewer").with_permission("content.read"))
        .unwrap();
    rbac.create_role(
        RoleData::new("editor")
            .with_permission("content.write")
            .with_parent("viewer"),
    )
    .unwrap();
    rbac.assign_role("alice", "editor").unwrap();
    Fixture { rbac, cache }
}

#[test]
fn test_repeat_checks_served_from_cache() {
    let f = fixture();
    assert!(f.rbac.check_permission("alice", "content.read"));
    let hits = f.cache.stats().hits;

    assert!(f.rbac.check_permission("alice", "content.read"));
    assert_eq!(f.cache.stats().hits, hits + 1);
}

#[test]
fn test_revoking_parent_grant_takes_effect_immediately() {
    let f = fixture();
    assert!(f.rbac.check_permission("alice", "content.read"));

    assert!(f.rbac.revoke_permission("viewer", "content.read").unwrap());
    assert!(!f.rbac.check_permission("alice", "content.read"));

    f.rbac.grant_permission("viewer", "content.read").unwrap();
    assert!(f.rbac.check_permission("alice", "content.read"));
}

#[test]
fn test_role_membership_changes_recompute() {
    let f = fixture();
    assert!(f.rbac.check_permission("alice", "content.write"));

    assert!(f.rbac.revoke_role("alice", "editor").unwrap());
    assert!(!f.rbac.check_permission("alice", "content.write"));
    assert!(!f.rbac.revoke_role("alice", "editor").unwrap());

    f.rbac.assign_role("alice", "viewer").unwrap();
    assert!(f.rbac.check_permission("alice", "content.read"));
    assert!(!f.rbac.check_permission("alice", "content.write"));
}

#[test]
fn test_parent_edge_changes_recompute() {
    let f = fixture();
    f.rbac
        .create_role(RoleData::new("publisher").with_permission("content.publish"))
        .unwrap();
    assert!(!f.rbac.check_permission("alice", "content.publish"));

    f.rbac.add_role_parent("viewer", "publisher").unwrap();
    assert!(f.rbac.check_permission("alice", "content.publish"));

    assert!(f.rbac.remove_role_parent("viewer", "publisher").unwrap());
    assert!(!f.rbac.check_permission("alice", "content.publish"));
}

#[test]
fn test_deleting_role_detaches_members_and_children() {
    let f = fixture();
    assert!(f.rbac.check_permission("alice", "content.read"));
    let version = f.rbac.policy_version();

    assert!(f.rbac.delete_role("viewer").unwrap());
    assert!(f.rbac.policy_version() > version);
    assert!(!f.rbac.check_permission("alice", "content.read"));
    assert!(f.rbac.check_permission("alice", "content.write"));
    assert!(f.rbac.role("editor").unwrap().parents.is_empty());
    assert!(!f.rbac.delete_role("viewer").unwrap());
}

#[test]
fn test_separator_in_user_id_does_not_share_decisions() {
    let f = fixture();
    f.rbac
        .create_role(RoleData::new("annotator").with_permission("doc:read"))
        .unwrap();
    f.rbac.assign_role("alice", "annotator").unwrap();

    assert!(f.rbac.check_permission("alice", "doc:read"));
    assert!(!f.rbac.check_permission("alice:doc", "read"));
    assert!(!f.rbac.check_permission("alice:doc", "read"));
}

#[test]
fn test_user_tags_are_unambiguous() {
    assert_ne!(user_tag("alice:x"), user_tag("alice"));
    assert_ne!(user_tag("a|1:b"), user_tag("a"));
}
