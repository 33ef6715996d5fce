/*!
 * Tracing
 * Subscriber setup and per-operation spans
 */

use crate::core::errors::ErrorKind;
use crate::core::types::OperationId;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - OPGUARD_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("OPGUARD_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span covering one `execute_critical` attempt
pub struct OperationSpan {
    span: Span,
    start: Instant,
    slow_after: Duration,
}

impl OperationSpan {
    pub fn new(operation_id: OperationId, op_type: &str, user: &str, slow_after: Duration) -> Self {
        let span = span!(
            Level::INFO,
            "operation",
            operation_id = %operation_id,
            op_type = op_type,
            user = user,
            state = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error_kind = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            slow_after,
        }
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record the state machine position
    pub fn record_state(&self, state: &str) {
        self.span.record("state", state);
    }

    pub fn record_success(&self) {
        self.span.record("outcome", "success");
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.span.record("outcome", "failure");
        self.span.record("error_kind", kind.as_str());
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_millis() as u64);
        let _entered = self.span.enter();

        if duration > self.slow_after {
            warn!(
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "Slow operation"
            );
        } else {
            debug!(duration_us = duration.as_micros() as u64, "Operation span closed");
        }
    }
}
