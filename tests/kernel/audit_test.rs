/*!
 * Audit trail and metrics produced by execution attempts
 */

use crate::support::{config, harness, harness_on, harness_with, read, update};
use opguard_kernel::{
    AuditRecord, AuditSink, ErrorKind, MemoryStore, Outcome, TransactionalStore,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

/// Sink that records what the store held when each record arrived
struct CommittedProbe {
    store: MemoryStore,
    seen: Mutex<Vec<(Outcome, Option<Value>)>>,
}

impl AuditSink for CommittedProbe {
    fn write(&self, record: &AuditRecord) -> Result<(), String> {
        let committed = self
            .store
            .read_committed("resource:doc")
            .map_err(|e| e.to_string())?;
        self.seen.lock().push((record.outcome, committed));
        Ok(())
    }
}

struct RejectingSink;

impl AuditSink for RejectingSink {
    fn write(&self, _record: &AuditRecord) -> Result<(), String> {
        Err("audit database unavailable".into())
    }
}

#[test]
fn test_one_record_per_attempt_in_order() {
    let h = harness();

    h.kernel
        .execute_critical(&update(json!({"v": 1})), &h.context("alice", "doc"))
        .unwrap();
    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("bob", "doc"))
        .unwrap_err();
    h.kernel
        .execute_critical(&read(), &h.context("bob", "doc"))
        .unwrap();
    h.kernel
        .execute_critical(&read(), &h.context("bob", "doc"))
        .unwrap();
    h.flush();

    let records = h.audit.recent(10);
    let summary: Vec<_> = records
        .iter()
        .rev()
        .map(|r| (r.op_type.as_str(), r.user(), r.outcome, r.error_kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("content.update", "alice", Outcome::Committed, None),
            ("content.update", "bob", Outcome::Rejected, Some(ErrorKind::Security)),
            ("content.read", "bob", Outcome::Committed, None),
            ("content.read", "bob", Outcome::Replayed, None),
        ]
    );
    assert_eq!(records[0].context.resource.as_deref(), Some("doc"));

    let stats = h.audit.stats();
    assert_eq!(stats.total_records, 4);
    assert_eq!(stats.rejected, 1);
    assert_eq!(h.audit.for_user("bob", 10).len(), 3);
}

#[test]
fn test_record_written_after_commit() {
    let store = MemoryStore::new();
    let probe = Arc::new(CommittedProbe {
        store: store.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let h = harness_on(store, config(), Some(probe.clone()));

    h.kernel
        .execute_critical(&update(json!({"v": 1})), &h.context("alice", "doc"))
        .unwrap();
    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("bob", "doc"))
        .unwrap_err();
    h.flush();

    assert_eq!(
        *probe.seen.lock(),
        vec![
            (Outcome::Committed, Some(json!({"v": 1}))),
            (Outcome::Rejected, Some(json!({"v": 1}))),
        ]
    );
}

#[test]
fn test_sink_failure_never_fails_the_operation() {
    let h = harness_with(config(), Some(Arc::new(RejectingSink)));

    let result = h
        .kernel
        .execute_critical(&update(json!({"v": 1})), &h.context("alice", "doc"))
        .unwrap();
    assert!(result.is_success());
    h.flush();

    assert_eq!(h.kernel.executor().recorder().audit_fallback_count(), 1);
    assert_eq!(
        h.store.read_committed("resource:doc").unwrap(),
        Some(json!({"v": 1}))
    );
}

#[test]
fn test_metrics_track_outcomes_by_type() {
    let h = harness();

    h.kernel
        .execute_critical(&update(json!({"v": 1})), &h.context("alice", "doc"))
        .unwrap();
    h.kernel
        .execute_critical(&update(json!({"v": 2})), &h.context("bob", "doc"))
        .unwrap_err();
    h.flush();

    let metrics = h.kernel.metrics();
    assert_eq!(metrics.counters.get("operation.content.update.success"), Some(&1));
    assert_eq!(metrics.counters.get("operation.content.update.failure"), Some(&1));
    assert_eq!(metrics.counters.get("errors.security"), Some(&1));
    assert_eq!(
        metrics
            .histograms
            .get("operation.content.update.duration")
            .map(|h| h.count),
        Some(2)
    );
}
