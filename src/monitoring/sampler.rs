/*!
 * Resource Sampling
 * Process memory and CPU readings taken when an operation finishes
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Point-in-time process usage; `None` where the platform gives no reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

/// Reads `/proc/self` on Linux; reports nothing elsewhere
///
/// CPU is the process share of one core since the previous sample.
pub struct ProcSampler {
    last: Mutex<Option<(Instant, u64)>>,
}

const PAGE_SIZE: u64 = 4096;
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

impl ProcSampler {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    fn memory_bytes() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident * PAGE_SIZE)
    }

    fn cpu_ticks() -> Option<u64> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // Fields after the parenthesized command name; utime and stime
        // are the 12th and 13th of those
        let rest = &stat[stat.rfind(')')? + 1..];
        let mut fields = rest.split_whitespace().skip(11);
        let utime: u64 = fields.next()?.parse().ok()?;
        let stime: u64 = fields.next()?.parse().ok()?;
        Some(utime + stime)
    }

    fn cpu_percent(&self) -> Option<f64> {
        let ticks = Self::cpu_ticks()?;
        let now = Instant::now();
        let mut last = self.last.lock();
        let previous = last.replace((now, ticks));

        let (at, before) = previous?;
        let wall = now.duration_since(at).as_secs_f64();
        if wall <= 0.0 {
            return None;
        }
        let cpu = ticks.saturating_sub(before) as f64 / CLOCK_TICKS_PER_SEC;
        Some((cpu / wall) * 100.0)
    }
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcSampler {
    fn sample(&self) -> ResourceUsage {
        ResourceUsage {
            memory_bytes: Self::memory_bytes(),
            cpu_percent: self.cpu_percent(),
        }
    }
}

/// Returns a configured reading
#[derive(Debug, Default)]
pub struct FixedSampler {
    usage: Mutex<ResourceUsage>,
}

impl FixedSampler {
    pub fn new(usage: ResourceUsage) -> Self {
        Self {
            usage: Mutex::new(usage),
        }
    }

    pub fn set(&self, usage: ResourceUsage) {
        *self.usage.lock() = usage;
    }
}

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> ResourceUsage {
        *self.usage.lock()
    }
}
