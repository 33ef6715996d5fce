/*!
 * Metrics Collection
 * Counters, gauges and latency histograms for protected operations
 */

use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency bucket upper bounds in milliseconds
const DURATION_BUCKETS_MS: [f64; 12] = [
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 10_000.0,
];

#[derive(Debug, Clone)]
struct Histogram {
    /// Non-cumulative count per bucket; the last slot holds overflow
    counts: Vec<u64>,
    sum: f64,
    count: u64,
    max: f64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            counts: vec![0; DURATION_BUCKETS_MS.len() + 1],
            sum: 0.0,
            count: 0,
            max: 0.0,
        }
    }

    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.max = self.max.max(value);

        let slot = DURATION_BUCKETS_MS
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.counts[slot] += 1;
    }

    /// Upper bound of the bucket holding the `p` quantile
    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        let target = ((self.count as f64) * p).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (slot, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return DURATION_BUCKETS_MS
                    .get(slot)
                    .copied()
                    .unwrap_or(self.max)
                    .min(self.max);
            }
        }
        self.max
    }

    fn stats(&self) -> HistogramStats {
        HistogramStats {
            count: self.count,
            sum: self.sum,
            avg: if self.count > 0 {
                self.sum / self.count as f64
            } else {
                0.0
            },
            max: self.max,
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

/// Metrics collector
pub struct MetricsCollector {
    counters: DashMap<String, u64, RandomState>,
    gauges: DashMap<String, f64, RandomState>,
    histograms: DashMap<String, Histogram, RandomState>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: DashMap::with_hasher(RandomState::new()),
            gauges: DashMap::with_hasher(RandomState::new()),
            histograms: DashMap::with_hasher(RandomState::new()),
            start_time: Instant::now(),
        }
    }

    pub fn inc_counter(&self, name: &str, value: u64) {
        self.counters
            .entry(name.to_string())
            .and_modify(|v| *v += value)
            .or_insert(value);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    /// Observe a value in milliseconds
    pub fn observe_histogram(&self, name: &str, value_ms: f64) {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .observe(value_ms);
    }

    pub fn record_duration(&self, name: &str, duration: Duration) {
        self.observe_histogram(name, duration.as_secs_f64() * 1_000.0);
    }

    /// `operation.<type>.success|failure` plus `operation.<type>.duration`
    pub fn record_operation(&self, op_type: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.inc_counter(&format!("operation.{}.{}", op_type, outcome), 1);
        self.record_duration(&format!("operation.{}.duration", op_type), duration);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|v| *v)
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramStats> {
        self.histograms.get(name).map(|h| h.stats())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().clone(), e.value().stats()))
                .collect(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn reset(&self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram statistics (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Point-in-time view of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub gauges: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, HistogramStats>,
    pub uptime_secs: u64,
}

/// Records elapsed time into a histogram when stopped or dropped
pub struct Timer {
    start: Instant,
    name: String,
    collector: Arc<MetricsCollector>,
    stopped: bool,
}

impl Timer {
    pub fn new(name: impl Into<String>, collector: Arc<MetricsCollector>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
            collector,
            stopped: false,
        }
    }

    pub fn stop(mut self) -> Duration {
        let duration = self.start.elapsed();
        self.collector.record_duration(&self.name, duration);
        self.stopped = true;
        duration
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.stopped {
            self.collector
                .record_duration(&self.name, self.start.elapsed());
        }
    }
}
