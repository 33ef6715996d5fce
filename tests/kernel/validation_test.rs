/*!
 * Context, security and input validation through the executor
 */

use crate::support::{config, harness, harness_with, read, row, update, TestOp};
use opguard_kernel::validation::JsonType;
use opguard_kernel::{
    Clock, FieldRule, KernelError, OperationDescriptor, OperationResult, SecurityContext, SecurityError,
    StateTransitionRule, TransactionalStore, ValidationError, ValidationStatus,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn rename(input: Value) -> TestOp {
    let stored = input.clone();
    TestOp::new(
        OperationDescriptor::new("content.rename")
            .requires("content.write")
            .rule("title", FieldRule::Required)
            .rule("title", FieldRule::Type(JsonType::String))
            .rule("title", FieldRule::MaxLength(8)),
        input,
        move |scope| {
            let key = row(scope);
            scope.put(&key, stored.clone())?;
            Ok(OperationResult::success(json!({})))
        },
    )
}

#[test]
fn test_unauthenticated_context_rejected() {
    let h = harness();
    let context = SecurityContext::builder("alice")
        .resource("doc")
        .at(h.clock.now())
        .build();

    let err = h.kernel.execute_critical(&read(), &context).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Security(SecurityError::Unauthenticated { .. })
    ));
}

#[test]
fn test_expired_session_rejected() {
    let h = harness();
    let context = h.context("alice", "doc");
    h.clock
        .advance(h.kernel.config().session_max_age + Duration::from_secs(1));

    let err = h.kernel.execute_critical(&read(), &context).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Security(SecurityError::SessionExpired { .. })
    ));
}

#[test]
fn test_context_without_resource_rejected() {
    let h = harness();
    let now = h.clock.now();
    let context = SecurityContext::builder("alice")
        .at(now)
        .authenticated_at(now)
        .build();

    let err = h.kernel.execute_critical(&read(), &context).unwrap_err();
    assert!(matches!(err, KernelError::Validation(_)));
}

#[test]
fn test_action_optional_but_checked_when_given() {
    let h = harness();
    let now = h.clock.now();
    let without = SecurityContext::builder("alice")
        .resource("doc")
        .at(now)
        .authenticated_at(now)
        .build();
    assert!(h.kernel.execute_critical(&update(json!({"v": 1})), &without).is_ok());

    let blank = SecurityContext::builder("alice")
        .resource("doc")
        .action("")
        .at(now)
        .authenticated_at(now)
        .build();
    let err = h
        .kernel
        .execute_critical(&update(json!({"v": 2})), &blank)
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Validation(ValidationError::MissingField { ref field }) if field == "action"
    ));
    assert_eq!(
        h.store.read_committed("resource:doc").unwrap(),
        Some(json!({"v": 1}))
    );
}

#[test]
fn test_future_timestamp_rejected() {
    let h = harness();
    let now = h.clock.now();
    let context = SecurityContext::builder("alice")
        .resource("doc")
        .at(now + Duration::from_secs(3600))
        .authenticated_at(now)
        .build();

    let err = h.kernel.execute_critical(&read(), &context).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Validation(ValidationError::MalformedField { ref field, .. }) if field == "timestamp"
    ));
}

#[test]
fn test_rate_limit_window() {
    let h = harness_with(
        config().with_rate_limit(2, Duration::from_secs(60)),
        None,
    );

    for v in 0..2 {
        h.kernel
            .execute_critical(&update(json!({ "v": v })), &h.context("alice", "doc"))
            .unwrap();
    }
    let err = h
        .kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("alice", "doc"))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Security(SecurityError::RateLimited { limit: 2, .. })
    ));
    assert_eq!(h.store.read_committed("resource:doc").unwrap(), Some(json!({"v": 1})));

    // Other users have their own budget
    h.kernel
        .execute_critical(&read(), &h.context("bob", "doc"))
        .unwrap();

    h.clock.advance(Duration::from_secs(61));
    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("alice", "doc"))
        .unwrap();
}

#[test]
fn test_state_transition_checked_against_locked_record() {
    let h = harness();
    h.store.insert("resource:doc", json!({"status": "draft"}));

    let workflow = Arc::new(
        StateTransitionRule::new("status")
            .initial("draft")
            .allow("draft", "review")
            .allow("review", "published"),
    );
    let transition = |target: &str| {
        let input = json!({ "status": target });
        let stored = input.clone();
        TestOp::new(
            OperationDescriptor::new("content.transition")
                .requires("content.write")
                .business_rule(workflow.clone()),
            input,
            move |scope| {
                let key = row(scope);
                scope.put(&key, stored.clone())?;
                Ok(OperationResult::success(json!({})))
            },
        )
    };

    let err = h
        .kernel
        .execute_critical(&transition("published"), &h.context("alice", "doc"))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Validation(ValidationError::BusinessRule { ref rule, .. }) if rule == "state_transition"
    ));
    assert_eq!(h.kernel.recovery().active_count(), 0);

    h.kernel
        .execute_critical(&transition("review"), &h.context("alice", "doc"))
        .unwrap();
    h.kernel
        .execute_critical(&transition("published"), &h.context("alice", "doc"))
        .unwrap();
    assert_eq!(
        h.store.read_committed("resource:doc").unwrap(),
        Some(json!({"status": "published"}))
    );
}

#[test]
fn test_read_cache_invalidated_by_write() {
    let h = harness();
    h.store.insert("resource:doc", json!({"v": 1}));
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let cached_read = TestOp::new(
        OperationDescriptor::new("content.read")
            .requires("content.read")
            .read_only()
            .cache_key("{resource}"),
        json!({}),
        move |scope| {
            counter.fetch_add(1, Ordering::SeqCst);
            let key = row(scope);
            Ok(OperationResult::success(json!({ "value": scope.get(&key)? })))
        },
    );

    let first = h
        .kernel
        .execute_critical(&cached_read, &h.context("bob", "doc"))
        .unwrap();
    let second = h
        .kernel
        .execute_critical(&cached_read, &h.context("bob", "doc"))
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(second.status(), ValidationStatus::Replayed);
    assert_eq!(second.payload(), first.payload());

    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("alice", "doc"))
        .unwrap();
    let third = h
        .kernel
        .execute_critical(&cached_read, &h.context("bob", "doc"))
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(third.payload(), &json!({"value": {"v": 2}}));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_invalid_input_never_mutates_store(title in "[a-z]{9,40}") {
        let h = harness();
        h.store.insert("resource:doc", json!({"title": "original"}));
        let before = h.store.dump();
        let commits = h.store.commit_count();

        let op = rename(json!({ "title": title }));
        let err = h.kernel.execute_critical(&op, &h.context("alice", "doc")).unwrap_err();

        let is_rule_violation = matches!(
            err,
            KernelError::Validation(ValidationError::RuleViolation { .. })
        );
        prop_assert!(is_rule_violation);
        prop_assert_eq!(h.store.dump(), before);
        prop_assert_eq!(h.store.commit_count(), commits);
        prop_assert_eq!(h.kernel.recovery().active_count(), 0);
    }

    #[test]
    fn prop_valid_input_commits(title in "[a-z]{1,8}") {
        let h = harness();
        let op = rename(json!({ "title": title.clone() }));
        h.kernel.execute_critical(&op, &h.context("alice", "doc")).unwrap();
        prop_assert_eq!(
            h.store.read_committed("resource:doc").unwrap(),
            Some(json!({ "title": title }))
        );
    }
}
