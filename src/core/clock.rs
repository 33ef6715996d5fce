/*!
 * Clock and Identifier Sources
 * Injected time and randomness so TTLs and ids are testable
 */

use super::types::OperationId;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    /// Seconds since UNIX epoch (0 for pre-epoch clocks)
    fn unix_secs(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Real system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at a fixed, round epoch offset
    pub fn at_unix(secs: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(secs))
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: SystemTime) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

/// Secure identifier and secret source
pub trait IdGenerator: Send + Sync {
    fn operation_id(&self) -> OperationId;

    /// Fill a fresh secret of `len` bytes
    fn secret(&self, len: usize) -> Vec<u8>;
}

/// OS-backed randomness
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn operation_id(&self) -> OperationId {
        OperationId::new_v4()
    }

    fn secret(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }
}
