/*!
 * Audit Trail
 * One append-only record per execution attempt
 *
 * Records are handed to a background worker over a bounded channel so the
 * executor never blocks on, or fails because of, the sink. Sink failures
 * and queue overflow go to the fallback channel (tracing target
 * `opguard::audit::fallback`) and are counted.
 */

use crate::core::errors::{ErrorKind, SerializableError};
use crate::core::guard::panic_message;
use crate::core::limits::{AUDIT_QUEUE_CAPACITY, MAX_AUDIT_EVENTS, MAX_AUDIT_EVENTS_PER_USER};
use crate::core::types::{OperationId, UserId};
use crate::executor::ContextSummary;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info, warn};

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    /// Served from the idempotency registry or result cache
    Replayed,
    /// Rejected before anything was mutated
    Rejected,
    RolledBack,
    RecoveryFailed,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Committed | Outcome::Replayed)
    }
}

/// Append-only audit record
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation_id: OperationId,
    pub op_type: String,
    pub context: ContextSummary,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializableError>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub recorded_at: SystemTime,
}

impl AuditRecord {
    pub fn user(&self) -> &str {
        &self.context.user
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn write(&self, record: &AuditRecord) -> Result<(), String>;
}

/// Writes records as structured tracing events
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), String> {
        let json = serde_json::to_string(record).map_err(|e| e.to_string())?;
        info!(
            target: "opguard::audit",
            operation_id = %record.operation_id,
            op_type = %record.op_type,
            user = %record.context.user,
            outcome = ?record.outcome,
            duration_ms = record.duration_ms,
            record = %json,
            "audit"
        );
        Ok(())
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_records: u64,
    pub retained: usize,
    pub committed: u64,
    pub replayed: u64,
    pub rejected: u64,
    pub rolled_back: u64,
    pub recovery_failed: u64,
    pub users_tracked: usize,
}

/// Bounded in-memory sink with per-user logs
pub struct MemoryAuditSink {
    records: RwLock<VecDeque<AuditRecord>>,
    per_user: DashMap<UserId, VecDeque<AuditRecord>, RandomState>,
    outcomes: DashMap<Outcome, u64, RandomState>,
    total: AtomicU64,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(MAX_AUDIT_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            per_user: DashMap::with_hasher(RandomState::new()),
            outcomes: DashMap::with_hasher(RandomState::new()),
            total: AtomicU64::new(0),
            capacity,
        }
    }

    /// Most recent first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        self.records.read().iter().rev().take(limit).cloned().collect()
    }

    /// Most recent first
    pub fn for_user(&self, user: &str, limit: usize) -> Vec<AuditRecord> {
        self.per_user
            .get(user)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn for_operation(&self, id: OperationId) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.operation_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> AuditStats {
        let count = |outcome: Outcome| self.outcomes.get(&outcome).map(|c| *c).unwrap_or(0);
        AuditStats {
            total_records: self.total.load(Ordering::Relaxed),
            retained: self.len(),
            committed: count(Outcome::Committed),
            replayed: count(Outcome::Replayed),
            rejected: count(Outcome::Rejected),
            rolled_back: count(Outcome::RolledBack),
            recovery_failed: count(Outcome::RecoveryFailed),
            users_tracked: self.per_user.len(),
        }
    }

    pub fn clear(&self) {
        self.records.write().clear();
        self.per_user.clear();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), String> {
        {
            let mut records = self.records.write();
            if records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(record.clone());
        }

        let mut log = self
            .per_user
            .entry(record.context.user.clone())
            .or_insert_with(|| VecDeque::with_capacity(MAX_AUDIT_EVENTS_PER_USER));
        if log.len() >= MAX_AUDIT_EVENTS_PER_USER {
            log.pop_front();
        }
        log.push_back(record.clone());
        drop(log);

        *self.outcomes.entry(record.outcome).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Fans a record out to several sinks, failing if any fails
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for CompositeAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), String> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.write(record) {
                failures.push(e);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

#[derive(Default)]
struct Progress {
    submitted: u64,
    processed: u64,
}

struct Shared {
    sink: Arc<dyn AuditSink>,
    progress: Mutex<Progress>,
    drained: Condvar,
    fallback: AtomicU64,
}

impl Shared {
    fn deliver(&self, record: AuditRecord) {
        // A panicking sink must not take the worker down with it
        let written = catch_unwind(AssertUnwindSafe(|| self.sink.write(&record)))
            .unwrap_or_else(|panic| {
                Err(format!("sink panicked: {}", panic_message(panic.as_ref())))
            });
        if let Err(reason) = written {
            fallback(&self.fallback, &record, &reason);
        }
        let mut progress = self.progress.lock();
        progress.processed += 1;
        self.drained.notify_all();
    }
}

fn fallback(counter: &AtomicU64, record: &AuditRecord, reason: &str) {
    counter.fetch_add(1, Ordering::Relaxed);
    error!(
        target: "opguard::audit::fallback",
        operation_id = %record.operation_id,
        op_type = %record.op_type,
        user = %record.context.user,
        outcome = ?record.outcome,
        reason,
        "Audit record could not be written"
    );
}

/// Deferred audit writer
///
/// `record` never blocks and never fails; delivery happens on a worker
/// thread in submission order.
pub struct AuditRecorder {
    sender: Option<flume::Sender<AuditRecord>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self::with_capacity(sink, AUDIT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded::<AuditRecord>(capacity.max(1));
        let shared = Arc::new(Shared {
            sink,
            progress: Mutex::new(Progress::default()),
            drained: Condvar::new(),
            fallback: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("opguard-audit".into())
            .spawn(move || {
                for record in receiver.iter() {
                    worker_shared.deliver(record);
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Audit worker unavailable, writing inline");
                None
            }
        };

        Self {
            sender: Some(sender),
            shared,
            worker,
        }
    }

    /// Queue a record for delivery
    pub fn record(&self, record: AuditRecord) {
        self.shared.progress.lock().submitted += 1;

        let sender = match (&self.sender, &self.worker) {
            (Some(sender), Some(_)) => sender,
            _ => {
                self.shared.deliver(record);
                return;
            }
        };

        if let Err(e) = sender.try_send(record) {
            let record = match e {
                flume::TrySendError::Full(r) | flume::TrySendError::Disconnected(r) => r,
            };
            fallback(&self.shared.fallback, &record, "audit queue unavailable");
            let mut progress = self.shared.progress.lock();
            progress.processed += 1;
            self.shared.drained.notify_all();
        }
    }

    /// Wait until every queued record has been handled
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress.lock();
        while progress.processed < progress.submitted {
            if self
                .shared
                .drained
                .wait_until(&mut progress, deadline)
                .timed_out()
            {
                return progress.processed >= progress.submitted;
            }
        }
        true
    }

    /// Records diverted to the fallback channel
    pub fn fallback_count(&self) -> u64 {
        self.shared.fallback.load(Ordering::Relaxed)
    }
}

impl Drop for AuditRecorder {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after it drains
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(target: "opguard::audit::fallback", "Audit worker panicked");
            }
        }
    }
}
