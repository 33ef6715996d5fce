/*!
 * Role hierarchy resolution and cycle rejection
 */

use opguard_kernel::cache::{CacheLayer, KeyedHasher, MemoryCacheStore};
use opguard_kernel::{
    KernelError, MemoryPermissionStore, PermissionResolver, RoleData, SecurityError, SystemClock,
    ValidationError,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn resolver() -> PermissionResolver {
    let cache = Arc::new(CacheLayer::new(
        Arc::new(MemoryCacheStore::new(10_000)),
        KeyedHasher::new(b"permission-tests-secret-0123").unwrap(),
        Arc::new(SystemClock),
        Duration::from_secs(600),
    ));
    PermissionResolver::new(Arc::new(MemoryPermissionStore::new()), cache).unwrap()
}

#[test]
fn test_permission_inherited_through_parent() {
    let rbac = resolver();
    rbac.create_role(RoleData::new("viewer").with_permission("content.read"))
        .unwrap();
    rbac.create_role(RoleData::new("editor").with_parent("viewer"))
        .unwrap();
    rbac.assign_role("carol", "editor").unwrap();

    assert!(!rbac.role("editor").unwrap().grants_directly("content.read"));
    assert!(rbac.check_permission("carol", "content.read"));
    assert!(!rbac.check_permission("carol", "content.write"));
    assert_eq!(
        rbac.resolve("carol").roles,
        vec!["editor".to_string(), "viewer".to_string()]
    );
}

#[test]
fn test_wildcard_grants() {
    let rbac = resolver();
    rbac.create_role(RoleData::new("ops").with_permission("kernel.*"))
        .unwrap();
    rbac.assign_role("dana", "ops").unwrap();

    assert!(rbac.check_permission("dana", "kernel.self_check"));
    assert!(rbac.check_permission("dana", "kernel.emergency.clear"));
    assert!(!rbac.check_permission("dana", "kernelx.read"));
}

#[test]
fn test_cycle_rejected_before_persistence() {
    let rbac = resolver();
    rbac.create_role(RoleData::new("Admin")).unwrap();
    rbac.create_role(RoleData::new("Manager").with_parent("Admin"))
        .unwrap();
    let version = rbac.policy_version();

    assert!(!rbac.validate_role_hierarchy("Admin", "Manager"));
    let err = rbac.add_role_parent("Admin", "Manager").unwrap_err();
    assert!(matches!(
        err,
        KernelError::Security(SecurityError::HierarchyCycle { ref role, ref parent })
            if role == "Admin" && parent == "Manager"
    ));

    assert!(rbac.role("Admin").unwrap().parents.is_empty());
    assert_eq!(rbac.policy_version(), version);
}

#[test]
fn test_cycle_rejection_independent_of_order() {
    for (first, second) in [(("A", "B"), ("B", "A")), (("B", "A"), ("A", "B"))] {
        let rbac = resolver();
        rbac.create_role(RoleData::new("A")).unwrap();
        rbac.create_role(RoleData::new("B")).unwrap();

        rbac.add_role_parent(first.0, first.1).unwrap();
        let err = rbac.add_role_parent(second.0, second.1).unwrap_err();
        assert!(matches!(
            err,
            KernelError::Security(SecurityError::HierarchyCycle { .. })
        ));
        assert!(!rbac.graph().has_cycle());
    }
}

#[test]
fn test_self_parent_rejected() {
    let rbac = resolver();
    let err = rbac
        .create_role(RoleData::new("loop").with_parent("loop"))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Security(SecurityError::HierarchyCycle { .. })
    ));
    assert!(rbac.role("loop").is_none());
}

#[test]
fn test_unknown_parent_rejected() {
    let rbac = resolver();
    let err = rbac
        .create_role(RoleData::new("orphan").with_parent("ghost"))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Validation(ValidationError::UnknownReference { ref id, .. }) if id == "ghost"
    ));
}

#[test]
fn test_depth_bound_truncates_walk() {
    let rbac = resolver().with_max_depth(3);
    rbac.create_role(RoleData::new("r0").with_permission("deep.secret"))
        .unwrap();
    for i in 1..6 {
        rbac.create_role(RoleData::new(format!("r{}", i)).with_parent(format!("r{}", i - 1)))
            .unwrap();
    }
    rbac.assign_role("erin", "r5").unwrap();
    rbac.assign_role("frank", "r2").unwrap();

    assert!(!rbac.check_permission("erin", "deep.secret"));
    assert!(rbac.truncation_count() > 0);
    assert!(rbac.check_permission("frank", "deep.secret"));
}

#[test]
fn test_diamond_resolves_each_role_once() {
    let rbac = resolver();
    rbac.create_role(RoleData::new("base").with_permission("content.read"))
        .unwrap();
    rbac.create_role(
        RoleData::new("left")
            .with_permission("content.write")
            .with_parent("base"),
    )
    .unwrap();
    rbac.create_role(
        RoleData::new("right")
            .with_permission("content.publish")
            .with_parent("base"),
    )
    .unwrap();
    rbac.create_role(RoleData::new("top").with_parent("left").with_parent("right"))
        .unwrap();
    rbac.assign_role("gail", "top").unwrap();

    let resolution = rbac.resolve("gail");
    assert_eq!(resolution.roles.len(), 4);
    assert!(!resolution.truncated);
    assert_eq!(
        resolution.permissions,
        BTreeSet::from([
            "content.publish".to_string(),
            "content.read".to_string(),
            "content.write".to_string(),
        ])
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Effective permissions depend on the edges, not the order they were added
    #[test]
    fn prop_resolution_is_order_independent(
        edges in prop::collection::vec((1usize..6, 0usize..6), 0..12)
    ) {
        // Parents always have a lower index, so no edge closes a cycle
        let edges: Vec<(usize, usize)> = edges.into_iter().filter(|(c, p)| p < c).collect();

        let build = |order: &[(usize, usize)]| {
            let rbac = resolver();
            for i in 0..6 {
                rbac.create_role(RoleData::new(format!("r{}", i)).with_permission(format!("p{}", i)))
                    .unwrap();
            }
            for (child, parent) in order {
                rbac.add_role_parent(&format!("r{}", child), &format!("r{}", parent))
                    .unwrap();
            }
            rbac.assign_role("user", "r5").unwrap();
            rbac.effective_permissions("user")
        };

        let forward = build(&edges);
        let reversed: Vec<_> = edges.iter().rev().cloned().collect();
        let backward = build(&reversed);

        prop_assert!(forward.contains("p5"));
        prop_assert_eq!(forward, backward);
    }

    /// Arbitrary edge sequences, cyclic ones included, never leave a cycle
    #[test]
    fn prop_graph_stays_acyclic(
        edges in prop::collection::vec((0usize..5, 0usize..5), 0..16)
    ) {
        let rbac = resolver();
        for i in 0..5 {
            rbac.create_role(RoleData::new(format!("r{}", i))).unwrap();
        }

        for (child, parent) in edges {
            let (child, parent) = (format!("r{}", child), format!("r{}", parent));
            let allowed = rbac.validate_role_hierarchy(&child, &parent);
            let added = rbac.add_role_parent(&child, &parent);
            prop_assert_eq!(added.is_ok(), allowed);
            if let Err(err) = added {
                let is_cycle = matches!(
                    err,
                    KernelError::Security(SecurityError::HierarchyCycle { .. })
                );
                prop_assert!(is_cycle);
            }
        }
        prop_assert!(!rbac.graph().has_cycle());
    }
}
