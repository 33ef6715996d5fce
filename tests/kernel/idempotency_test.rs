/*!
 * Idempotent replay and in-flight duplicate handling
 */

use crate::support::{harness, row, TestOp};
use opguard_kernel::{
    KernelError, OperationDescriptor, OperationResult, Outcome, SystemError, TransactionalStore,
    ValidationError, ValidationStatus,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn publish(runs: Arc<AtomicUsize>) -> TestOp {
    TestOp::new(
        OperationDescriptor::new("content.publish")
            .requires("content.write")
            .idempotency_key("{user}:{resource}"),
        json!({}),
        move |scope| {
            let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
            let key = row(scope);
            scope.put(&key, json!({"published": true, "run": run}))?;
            Ok(OperationResult::success(json!({"run": run})))
        },
    )
}

#[test]
fn test_repeat_within_window_replays_result() {
    let h = harness();
    let runs = Arc::new(AtomicUsize::new(0));
    let op = publish(runs.clone());
    let context = h.context("alice", "doc-7");

    let first = h.kernel.execute_critical(&op, &context).unwrap();
    let commits = h.store.commit_count();
    let second = h.kernel.execute_critical(&op, &context).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first.status(), ValidationStatus::Verified);
    assert_eq!(second.status(), ValidationStatus::Replayed);
    assert_eq!(second.payload(), first.payload());
    assert_eq!(second.digest(), first.digest());
    assert_eq!(h.store.commit_count(), commits);

    h.flush();
    let outcomes: Vec<_> = h.audit.recent(2).iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Replayed, Outcome::Committed]);
}

#[test]
fn test_key_is_scoped_to_rendered_template() {
    let h = harness();
    let runs = Arc::new(AtomicUsize::new(0));
    let op = publish(runs.clone());

    h.kernel.execute_critical(&op, &h.context("alice", "doc-1")).unwrap();
    h.kernel.execute_critical(&op, &h.context("alice", "doc-2")).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_expired_key_runs_again() {
    let h = harness();
    let runs = Arc::new(AtomicUsize::new(0));
    let op = publish(runs.clone());

    h.kernel.execute_critical(&op, &h.context("alice", "doc-7")).unwrap();
    h.clock
        .advance(h.kernel.config().idempotency_window + Duration::from_secs(1));
    let again = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc-7"))
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(again.status(), ValidationStatus::Verified);
    assert_eq!(
        h.store.read_committed("resource:doc-7").unwrap(),
        Some(json!({"published": true, "run": 2}))
    );
}

#[test]
fn test_failed_attempt_releases_key() {
    let h = harness();
    let fail = Arc::new(AtomicBool::new(true));
    let flag = fail.clone();
    let op = TestOp::new(
        OperationDescriptor::new("content.publish")
            .requires("content.write")
            .idempotency_key("{resource}"),
        json!({}),
        move |_scope| {
            if flag.load(Ordering::SeqCst) {
                return Err(SystemError::OperationFailed {
                    reason: "search index offline".into(),
                }
                .into());
            }
            Ok(OperationResult::success(json!({"published": true})))
        },
    );
    let context = h.context("alice", "doc-7");

    assert!(h.kernel.execute_critical(&op, &context).is_err());
    assert!(h.kernel.executor().idempotency().is_empty());

    fail.store(false, Ordering::SeqCst);
    let retried = h.kernel.execute_critical(&op, &context).unwrap();
    assert_eq!(retried.status(), ValidationStatus::Verified);
}

#[test]
fn test_duplicate_while_in_flight_is_rejected() {
    let h = harness();
    let (entered_tx, entered_rx) = flume::bounded::<()>(1);
    let (release_tx, release_rx) = flume::bounded::<()>(1);

    let op = TestOp::new(
        OperationDescriptor::new("content.publish")
            .requires("content.write")
            .idempotency_key("{resource}"),
        json!({}),
        move |_scope| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(WAIT);
            Ok(OperationResult::success(json!({"published": true})))
        },
    );

    thread::scope(|s| {
        let first = s.spawn(|| h.kernel.execute_critical(&op, &h.context("alice", "doc-7")));
        if entered_rx.recv_timeout(WAIT).is_err() {
            let outcome = first.join().unwrap();
            panic!("first attempt never reached its body: {:?}", outcome.err());
        }

        let err = h
            .kernel
            .execute_critical(&op, &h.context("alice", "doc-7"))
            .unwrap_err();
        let _ = release_tx.send(());
        assert!(matches!(
            err,
            KernelError::Validation(ValidationError::DuplicateInFlight { ref key })
                if key.contains("content.publish") && key.contains("doc-7")
        ));
        assert!(first.join().unwrap().is_ok());
    });

    let replayed = h
        .kernel
        .execute_critical(&op, &h.context("alice", "doc-7"))
        .unwrap();
    assert_eq!(replayed.status(), ValidationStatus::Replayed);
}

#[test]
fn test_key_never_shared_across_users() {
    let h = harness();
    h.kernel.assign_role("alice:x", "writer").unwrap();
    h.kernel.assign_role("{resource}", "writer").unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let op = publish(runs.clone());

    let first = h
        .kernel
        .execute_critical(&op, &h.context("alice", "x:y"))
        .unwrap();
    let second = h
        .kernel
        .execute_critical(&op, &h.context("alice:x", "y"))
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(first.status(), ValidationStatus::Verified);
    assert_eq!(second.status(), ValidationStatus::Verified);
    assert_eq!(
        h.store.read_committed("resource:y").unwrap(),
        Some(json!({"published": true, "run": 2}))
    );

    // A placeholder inside an identifier is not expanded again
    h.kernel
        .execute_critical(&op, &h.context("alice", "doc-9"))
        .unwrap();
    let sneaky = h
        .kernel
        .execute_critical(&op, &h.context("{resource}", "doc-9"))
        .unwrap();
    assert_eq!(sneaky.status(), ValidationStatus::Verified);
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}
