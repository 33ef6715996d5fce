/*!
 * Rollback, snapshot restore and emergency mode
 */

use crate::support::{harness, read, row, update, TestOp};
use opguard_kernel::monitoring::AlertSeverity;
use opguard_kernel::{
    AlertKind, KernelError, OperationDescriptor, OperationResult, Outcome, SecurityError,
    SystemError, TransactionalStore, ValidationError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;

fn failing_update() -> TestOp {
    TestOp::new(
        OperationDescriptor::new("content.update").requires("content.write"),
        json!({}),
        |scope| {
            let key = row(scope);
            scope.put(&key, json!({"v": 2}))?;
            scope.put("resource:side-table", json!({"touched": true}))?;
            Err(SystemError::OperationFailed {
                reason: "downstream call failed".into(),
            }
            .into())
        },
    )
}

#[test]
fn test_body_error_rolls_back_every_write() {
    let h = harness();
    h.store.insert("resource:doc", json!({"v": 1}));
    let rollbacks = h.store.rollback_count();

    let err = h
        .kernel
        .execute_critical(&failing_update(), &h.context("alice", "doc"))
        .unwrap_err();

    assert!(matches!(err, KernelError::System(SystemError::OperationFailed { .. })));
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), Some(json!({"v": 1})));
    assert_eq!(h.store.read_committed("resource:side-table").unwrap(), None);
    assert_eq!(h.store.rollback_count(), rollbacks + 1);
    assert_eq!(h.store.locks_held(), 0);
    assert_eq!(h.kernel.recovery().active_count(), 0);
}

#[test]
fn test_panic_is_contained_and_rolled_back() {
    let h = harness();
    h.store.insert("resource:doc", json!({"v": 1}));

    let op = TestOp::new(
        OperationDescriptor::new("content.update").requires("content.write"),
        json!({}),
        |scope| {
            let key = row(scope);
            scope.put(&key, json!({"v": 99}))?;
            panic!("index out of bounds");
        },
    );

    let err = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc"))
        .unwrap_err();
    match err {
        KernelError::System(SystemError::Panicked { reason }) => {
            assert!(reason.contains("index out of bounds"));
        }
        other => panic!("expected panic error, got {:?}", other),
    }
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), Some(json!({"v": 1})));

    // The row lock was released, so the next writer proceeds
    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("alice", "doc"))
        .unwrap();
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), Some(json!({"v": 2})));
}

#[test]
fn test_rejected_result_is_rolled_back() {
    let h = harness();
    let op = TestOp::new(
        OperationDescriptor::new("content.update").requires("content.write"),
        json!({}),
        |scope| {
            let key = row(scope);
            scope.put(&key, json!({"v": 2}))?;
            Ok(OperationResult::failure("quota exhausted"))
        },
    );

    let err = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc"))
        .unwrap_err();

    assert!(matches!(
        err,
        KernelError::Validation(ValidationError::OperationRejected { ref reason })
            if reason == "quota exhausted"
    ));
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), None);

    h.flush();
    assert_eq!(h.audit.recent(1)[0].outcome, Outcome::RolledBack);
}

#[test]
fn test_missing_result_field_is_rolled_back() {
    let h = harness();
    let op = TestOp::new(
        OperationDescriptor::new("content.update")
            .requires("content.write")
            .result_field("revision"),
        json!({}),
        |scope| {
            let key = row(scope);
            scope.put(&key, json!({"v": 2}))?;
            Ok(OperationResult::success(json!({"ok": true})))
        },
    );

    let err = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc"))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Validation(ValidationError::InvalidResult { .. })
    ));
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), None);
}

#[test]
fn test_overwritten_file_restored_on_failure() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, b"original").unwrap();

    let target = path.clone();
    let op = TestOp::new(
        OperationDescriptor::new("settings.write").requires("content.write"),
        json!({}),
        move |scope| {
            scope.write_file(&target, b"replacement")?;
            Err(SystemError::OperationFailed {
                reason: "validation service unreachable".into(),
            }
            .into())
        },
    );

    h.kernel
        .execute_critical(&op, &h.context("alice", "settings"))
        .unwrap_err();
    assert_eq!(fs::read(&path).unwrap(), b"original");
}

#[test]
fn test_snapshot_facade_restores_committed_values() {
    let h = harness();
    h.store.insert("resource:doc", json!({"v": 1}));

    let snapshot = h.kernel.create_snapshot(&["resource:doc", "resource:new"]).unwrap();
    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("alice", "doc"))
        .unwrap();
    h.kernel
        .execute_critical(&update(json!({"created": true})), &h.context("alice", "new"))
        .unwrap();

    let report = h.kernel.restore(snapshot).unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), Some(json!({"v": 1})));
    assert_eq!(h.store.read_committed("resource:new").unwrap(), None);
    assert!(h.kernel.recovery().snapshot(snapshot).is_none());
}

#[test]
fn test_failed_restore_enters_emergency_mode() {
    let h = harness();
    h.store.insert("resource:doc", json!({"v": 1}));
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("exports");
    fs::create_dir(&nested).unwrap();
    let path = nested.join("doc.json");
    fs::write(&path, b"v1").unwrap();

    let target = path.clone();
    let op = TestOp::new(
        OperationDescriptor::new("content.export").requires("content.write"),
        json!({}),
        move |scope| {
            scope.write_file(&target, b"v2")?;
            // Nothing left to restore the file into
            fs::remove_dir_all(target.parent().unwrap_or(&target))?;
            Err(SystemError::OperationFailed {
                reason: "export aborted".into(),
            }
            .into())
        },
    );

    let err = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc"))
        .unwrap_err();
    assert!(matches!(err, KernelError::System(SystemError::RecoveryFailed { .. })));

    let emergency = h.kernel.emergency().unwrap();
    assert!(emergency.reason.contains("doc.json"));

    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert!(matches!(alerts[0].kind, AlertKind::EmergencyMode { .. }));

    h.flush();
    assert_eq!(h.audit.recent(1)[0].outcome, Outcome::RecoveryFailed);

    // Mutations are blocked, reads still run
    let blocked = h
        .kernel
        .execute_critical(&update(json!({"v": 3})), &h.context("alice", "doc"))
        .unwrap_err();
    assert!(matches!(
        blocked,
        KernelError::Security(SecurityError::EmergencyMode { .. })
    ));
    let served = h
        .kernel
        .execute_critical(&read(), &h.context("alice", "doc"))
        .unwrap();
    assert_eq!(served.payload(), &json!({"value": {"v": 1}}));

    assert!(h.kernel.clear_emergency("ops-oncall"));
    assert!(!h.kernel.clear_emergency("ops-oncall"));
    h.kernel
        .execute_critical(&update(json!({"v": 3})), &h.context("alice", "doc"))
        .unwrap();
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), Some(json!({"v": 3})));
}
