/*!
 * Operation Recorder
 * Audit, metrics and threshold alerts for each execution attempt
 *
 * `record_attempt` is infallible: audit delivery is deferred to the audit
 * worker and threshold alerts to the alert worker.
 */

use super::alerts::{Alert, AlertDispatcher, AlertKind, AlertSeverity};
use super::audit::{AuditRecord, AuditRecorder, Outcome};
use super::metrics::MetricsCollector;
use super::sampler::{ResourceSampler, ResourceUsage};
use crate::core::config::ThresholdConfig;
use crate::core::errors::{KernelError, SerializableError};
use crate::core::types::OperationId;
use crate::executor::ContextSummary;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// One finished execution attempt
#[derive(Debug)]
pub struct Attempt<'a> {
    pub operation_id: OperationId,
    pub op_type: &'a str,
    pub context: ContextSummary,
    pub outcome: Outcome,
    pub duration: Duration,
    pub error: Option<&'a KernelError>,
}

pub struct OperationRecorder {
    audit: AuditRecorder,
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertDispatcher>,
    sampler: Arc<dyn ResourceSampler>,
    thresholds: ThresholdConfig,
}

impl OperationRecorder {
    pub fn new(
        audit: AuditRecorder,
        metrics: Arc<MetricsCollector>,
        alerts: Arc<AlertDispatcher>,
        sampler: Arc<dyn ResourceSampler>,
        thresholds: ThresholdConfig,
    ) -> Self {
        Self {
            audit,
            metrics,
            alerts,
            sampler,
            thresholds,
        }
    }

    /// Audit the attempt, update metrics and raise threshold alerts
    pub fn record_attempt(&self, attempt: Attempt<'_>) {
        let record = AuditRecord {
            operation_id: attempt.operation_id,
            op_type: attempt.op_type.to_string(),
            context: attempt.context,
            outcome: attempt.outcome,
            duration_ms: attempt.duration.as_millis() as u64,
            error_kind: attempt.error.map(KernelError::kind),
            error: attempt.error.map(SerializableError::from),
            recorded_at: SystemTime::now(),
        };
        self.audit.record(record);

        self.metrics.record_operation(
            attempt.op_type,
            attempt.outcome.is_success(),
            attempt.duration,
        );
        if let Some(err) = attempt.error {
            self.metrics
                .inc_counter(&format!("errors.{}", err.kind().as_str()), 1);
        }

        let usage = self.sampler.sample();
        if let Some(bytes) = usage.memory_bytes {
            self.metrics.set_gauge("process.memory_bytes", bytes as f64);
        }
        if let Some(cpu) = usage.cpu_percent {
            self.metrics.set_gauge("process.cpu_percent", cpu);
        }

        for alert in self.breaches(attempt.op_type, attempt.duration, usage) {
            self.metrics.inc_counter("alerts.threshold", 1);
            self.alerts
                .dispatch(alert.for_operation(attempt.operation_id));
        }
        debug!(
            operation_id = %attempt.operation_id,
            outcome = ?attempt.outcome,
            "Attempt recorded"
        );
    }

    fn breaches(&self, op_type: &str, duration: Duration, usage: ResourceUsage) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let limits = &self.thresholds;

        if duration > limits.max_duration {
            alerts.push(threshold(
                "duration_ms",
                duration.as_secs_f64() * 1_000.0,
                limits.max_duration.as_secs_f64() * 1_000.0,
                format!("{} exceeded its duration threshold", op_type),
            ));
        }
        if let Some(bytes) = usage.memory_bytes.filter(|b| *b > limits.max_memory_bytes) {
            alerts.push(threshold(
                "memory_bytes",
                bytes as f64,
                limits.max_memory_bytes as f64,
                format!("memory above threshold after {}", op_type),
            ));
        }
        if let Some(cpu) = usage.cpu_percent.filter(|c| *c > limits.max_cpu_percent) {
            alerts.push(threshold(
                "cpu_percent",
                cpu,
                limits.max_cpu_percent,
                format!("CPU above threshold after {}", op_type),
            ));
        }
        alerts
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }

    /// Wait for queued audit records and alerts to be delivered
    pub fn flush(&self, timeout: Duration) -> bool {
        let audited = self.audit.flush(timeout);
        let alerted = self.alerts.flush(timeout);
        audited && alerted
    }

    /// Audit records diverted to the fallback channel
    pub fn audit_fallback_count(&self) -> u64 {
        self.audit.fallback_count()
    }
}

fn threshold(metric: &str, value: f64, limit: f64, message: String) -> Alert {
    Alert::new(
        AlertSeverity::Warning,
        AlertKind::Threshold {
            metric: metric.to_string(),
            value,
            limit,
        },
        message,
    )
}
