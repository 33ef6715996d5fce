/*!
 * End-to-end executor scenarios
 * Inherited permissions, artifact cleanup and row-lock serialization
 */

use crate::support::{harness, read, row, update, TestOp};
use opguard_kernel::{
    ErrorKind, KernelError, OperationDescriptor, OperationResult, Outcome, SecurityError,
    SystemError, TransactionalStore, ValidationStatus,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_inherited_permission_allows_read() {
    let h = harness();
    h.store.insert("resource:doc-1", json!({"title": "Draft"}));

    // alice holds only `writer`; `content.read` comes from its parent
    assert!(h.kernel.check_permission("alice", "content.read"));

    let result = h
        .kernel
        .execute_critical(&read(), &h.context("alice", "doc-1"))
        .unwrap();
    assert_eq!(result.payload(), &json!({"value": {"title": "Draft"}}));
    assert_eq!(result.status(), ValidationStatus::Verified);
}

#[test]
fn test_missing_permission_leaves_state_untouched() {
    let h = harness();
    h.store.insert("resource:doc-1", json!({"title": "Draft"}));
    let commits = h.store.commit_count();

    let err = h
        .kernel
        .execute_critical(&update(json!({"title": "Hijacked"})), &h.context("bob", "doc-1"))
        .unwrap_err();

    assert!(matches!(
        err,
        KernelError::Security(SecurityError::PermissionDenied { ref permission, .. })
            if permission == "content.write"
    ));
    assert_eq!(
        h.store.read_committed("resource:doc-1").unwrap(),
        Some(json!({"title": "Draft"}))
    );
    assert_eq!(h.store.commit_count(), commits);

    h.flush();
    assert_eq!(h.audit.recent(1)[0].outcome, Outcome::Rejected);
}

#[test]
fn test_file_artifact_removed_after_failed_insert() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    let path = export.clone();

    let op = TestOp::new(
        OperationDescriptor::new("content.export").requires("content.write"),
        json!({}),
        move |scope| {
            scope.write_file(&path, br#"{"title":"Draft"}"#)?;
            let key = row(scope);
            scope.put(&key, json!({"exported": true}))?;
            Err(SystemError::Storage {
                reason: "insert into exports failed".into(),
            }
            .into())
        },
    );

    let err = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc-1"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::System);
    assert!(!export.exists());
    assert_eq!(h.store.read_committed("resource:doc-1").unwrap(), None);
    assert_eq!(h.kernel.recovery().active_count(), 0);
    assert!(h.kernel.emergency().is_none());

    h.flush();
    assert_eq!(h.audit.recent(1)[0].outcome, Outcome::RolledBack);
}

fn increment() -> TestOp {
    TestOp::new(
        OperationDescriptor::new("counter.increment").requires("content.write"),
        json!({}),
        |scope| {
            let key = row(scope);
            let n = scope
                .get_for_update(&key)?
                .and_then(|v| v.get("n").and_then(Value::as_u64))
                .unwrap_or(0);
            thread::sleep(Duration::from_millis(20));
            scope.put(&key, json!({ "n": n + 1 }))?;
            Ok(OperationResult::success(json!({ "n": n + 1 })))
        },
    )
}

#[test]
fn test_concurrent_updates_on_one_resource_serialize() {
    let h = harness();
    h.store.insert("resource:counter", json!({"n": 0}));
    let op = increment();

    thread::scope(|s| {
        let workers: Vec<_> = (0..2)
            .map(|_| s.spawn(|| h.kernel.execute_critical(&op, &h.context("alice", "counter"))))
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }
    });

    // A lost update would leave n == 1
    assert_eq!(
        h.store.read_committed("resource:counter").unwrap(),
        Some(json!({"n": 2}))
    );
    assert_eq!(h.store.locks_held(), 0);
}

#[test]
fn test_observers_never_see_partial_writes() {
    let h = harness();
    h.store.insert("resource:pair", json!({"a": 0, "b": 0}));
    let done = AtomicBool::new(false);

    let op = TestOp::new(
        OperationDescriptor::new("pair.bump").requires("content.write"),
        json!({}),
        |scope| {
            let key = row(scope);
            for step in 1..=5 {
                scope.put(&key, json!({"a": step, "b": step - 1}))?;
                thread::sleep(Duration::from_millis(2));
                scope.put(&key, json!({"a": step, "b": step}))?;
            }
            Ok(OperationResult::success(json!({})))
        },
    );

    thread::scope(|s| {
        let observer = s.spawn(|| {
            let mut seen = 0;
            while !done.load(Ordering::Acquire) {
                let pair = h.store.read_committed("resource:pair").unwrap().unwrap();
                assert_eq!(pair["a"], pair["b"]);
                seen += 1;
            }
            seen
        });

        for _ in 0..3 {
            h.kernel
                .execute_critical(&op, &h.context("alice", "pair"))
                .unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(observer.join().unwrap() > 0);
    });

    assert_eq!(
        h.store.read_committed("resource:pair").unwrap(),
        Some(json!({"a": 5, "b": 5}))
    );
}
