/*!
 * Monitoring
 * Audit trail, metrics, resource sampling, alerts and tracing
 */

pub mod alerts;
pub mod audit;
pub mod metrics;
pub mod recorder;
pub mod sampler;
pub mod tracer;

pub use alerts::{
    Alert, AlertDispatcher, AlertKind, AlertSeverity, MemoryNotifier, Notifier, TracingNotifier,
};
pub use audit::{
    AuditRecord, AuditRecorder, AuditSink, AuditStats, CompositeAuditSink, MemoryAuditSink,
    Outcome, TracingAuditSink,
};
pub use metrics::{HistogramStats, MetricsCollector, MetricsSnapshot, Timer};
pub use recorder::{Attempt, OperationRecorder};
pub use sampler::{FixedSampler, ProcSampler, ResourceSampler, ResourceUsage};
pub use tracer::{init_tracing, OperationSpan};
