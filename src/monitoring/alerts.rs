/*!
 * Alerts
 * Operator notifications for threshold breaches and emergencies
 */

use crate::core::limits::ALERT_QUEUE_CAPACITY;
use crate::core::types::OperationId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;
use tracing::{error, warn};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// What triggered the alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    /// A sampled metric exceeded its configured limit
    Threshold {
        metric: String,
        value: f64,
        limit: f64,
    },
    /// Snapshot restore failed; mutations are blocked
    EmergencyMode { snapshot: u64, reason: String },
    /// Emergency mode lifted by an operator
    EmergencyCleared { operator: String },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    #[serde(flatten)]
    pub kind: AlertKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    pub message: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub raised_at: SystemTime,
}

impl Alert {
    pub fn new(severity: AlertSeverity, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            operation_id: None,
            message: message.into(),
            raised_at: SystemTime::now(),
        }
    }

    pub fn for_operation(mut self, id: OperationId) -> Self {
        self.operation_id = Some(id);
        self
    }
}

/// Notification channel supplied by the host application
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<(), String>;
}

/// Logs alerts as tracing events
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, alert: &Alert) -> Result<(), String> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                target: "opguard::alert",
                kind = ?alert.kind,
                operation_id = ?alert.operation_id,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                target: "opguard::alert",
                kind = ?alert.kind,
                operation_id = ?alert.operation_id,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Keeps alerts in memory for inspection
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, alert: &Alert) -> Result<(), String> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

enum Message {
    Alert(Alert),
    Flush(flume::Sender<()>),
}

/// Delivers alerts off the caller's thread
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    sender: Option<flume::Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (sender, receiver) = flume::bounded::<Message>(ALERT_QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));

        let worker_notifier = notifier.clone();
        let worker_dropped = dropped.clone();
        let worker = std::thread::Builder::new()
            .name("opguard-alerts".into())
            .spawn(move || {
                for message in receiver.iter() {
                    match message {
                        Message::Alert(alert) => {
                            if let Err(e) = worker_notifier.notify(&alert) {
                                worker_dropped.fetch_add(1, Ordering::Relaxed);
                                error!(error = %e, kind = ?alert.kind, "Alert delivery failed");
                            }
                        }
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })
            .map_err(|e| warn!(error = %e, "Alert worker unavailable, delivering inline"))
            .ok();

        Self {
            notifier,
            sender: Some(sender),
            worker,
            dropped,
        }
    }

    /// Queue an alert; never blocks
    pub fn dispatch(&self, alert: Alert) {
        let sender = match (&self.sender, &self.worker) {
            (Some(sender), Some(_)) => sender,
            _ => {
                let _ = self.deliver_now(&alert);
                return;
            }
        };
        if sender.try_send(Message::Alert(alert)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Alert queue full, alert dropped");
        }
    }

    /// Deliver on the caller's thread, returning the notifier's verdict
    pub fn deliver_now(&self, alert: &Alert) -> Result<(), String> {
        let result = self.notifier.notify(alert);
        if let Err(e) = &result {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, kind = ?alert.kind, "Alert delivery failed");
        }
        result
    }

    /// Wait until alerts queued so far were handed to the notifier
    pub fn flush(&self, timeout: std::time::Duration) -> bool {
        let Some(sender) = &self.sender else {
            return true;
        };
        if self.worker.is_none() {
            return true;
        }
        let (done_tx, done_rx) = flume::bounded(1);
        if sender.send_timeout(Message::Flush(done_tx), timeout).is_err() {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Alerts that could not be delivered
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
