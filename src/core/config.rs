/*!
 * Kernel Configuration
 *
 * Immutable configuration value handed to the kernel builder. Loaded from a
 * JSON file, the environment, or defaults from `core::limits`.
 *
 * Environment variables:
 * - OPGUARD_CONFIG: path to a JSON config file
 * - OPGUARD_RATE_LIMIT: override `rate_limit.max_requests`
 * - OPGUARD_LOCK_TIMEOUT_MS: override `lock_timeout`
 */

use super::errors::{KernelError, SystemError};
use super::limits::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Configuration loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for KernelError {
    fn from(err: ConfigError) -> Self {
        KernelError::System(SystemError::Configuration {
            reason: err.to_string(),
        })
    }
}

/// Fixed-window rate limit settings
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RateLimitConfig {
    pub max_requests: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: RATE_LIMIT_MAX_REQUESTS,
            window: RATE_LIMIT_WINDOW,
        }
    }
}

/// Alert thresholds checked after each execution
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ThresholdConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_duration: Duration,
    pub max_memory_bytes: u64,
    pub max_cpu_percent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_duration: MAX_OPERATION_DURATION,
            max_memory_bytes: MAX_MEMORY_BYTES,
            max_cpu_percent: MAX_CPU_PERCENT,
        }
    }
}

/// Kernel configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct KernelConfig {
    pub max_role_depth: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub permission_cache_ttl: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cache_default_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub lock_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub idempotency_window: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub session_max_age: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub clock_skew_tolerance: Duration,
    pub thresholds: ThresholdConfig,
    pub audit_capacity: usize,
    pub audit_queue_capacity: usize,
    /// Hex-encoded HMAC secret; random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_secret: Option<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_role_depth: MAX_ROLE_DEPTH,
            permission_cache_ttl: PERMISSION_CACHE_TTL,
            cache_default_ttl: CACHE_DEFAULT_TTL,
            rate_limit: RateLimitConfig::default(),
            lock_timeout: LOCK_TIMEOUT,
            idempotency_window: IDEMPOTENCY_WINDOW,
            session_max_age: SESSION_MAX_AGE,
            clock_skew_tolerance: CLOCK_SKEW_TOLERANCE,
            thresholds: ThresholdConfig::default(),
            audit_capacity: MAX_AUDIT_EVENTS,
            audit_queue_capacity: AUDIT_QUEUE_CAPACITY,
            cache_secret: None,
        }
    }
}

impl KernelConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to load configuration");
            ConfigError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let config: KernelConfig = serde_json::from_str(&raw).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to parse configuration");
            ConfigError::Parse(e.to_string())
        })?;

        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from `OPGUARD_CONFIG` (or defaults) and apply overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("OPGUARD_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(raw) = std::env::var("OPGUARD_RATE_LIMIT") {
            config.rate_limit.max_requests = raw
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("OPGUARD_RATE_LIMIT={}", raw)))?;
        }

        if let Ok(raw) = std::env::var("OPGUARD_LOCK_TIMEOUT_MS") {
            let millis: u64 = raw
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("OPGUARD_LOCK_TIMEOUT_MS={}", raw)))?;
            config.lock_timeout = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the kernel cannot operate under
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_role_depth == 0 {
            return Err(ConfigError::Invalid("max_role_depth must be > 0".into()));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests must be > 0".into(),
            ));
        }
        if self.rate_limit.window.as_secs() == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window must be at least one second".into(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid("lock_timeout must be > 0".into()));
        }
        if self.audit_capacity == 0 || self.audit_queue_capacity == 0 {
            return Err(ConfigError::Invalid("audit capacities must be > 0".into()));
        }
        self.secret_bytes()?;
        Ok(())
    }

    /// Decoded HMAC secret, if configured
    pub fn secret_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.cache_secret {
            None => Ok(None),
            Some(hex_secret) => {
                let bytes = hex::decode(hex_secret)
                    .map_err(|e| ConfigError::Invalid(format!("cache_secret: {}", e)))?;
                if bytes.len() < 16 {
                    return Err(ConfigError::Invalid(
                        "cache_secret must be at least 16 bytes".into(),
                    ));
                }
                Ok(Some(bytes))
            }
        }
    }

    pub fn with_rate_limit(mut self, max_requests: u64, window: Duration) -> Self {
        self.rate_limit = RateLimitConfig {
            max_requests,
            window,
        };
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_role_depth(mut self, depth: usize) -> Self {
        self.max_role_depth = depth;
        self
    }

    pub fn with_permission_cache_ttl(mut self, ttl: Duration) -> Self {
        self.permission_cache_ttl = ttl;
        self
    }

    pub fn with_idempotency_window(mut self, window: Duration) -> Self {
        self.idempotency_window = window;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_cache_secret(mut self, secret: &[u8]) -> Self {
        self.cache_secret = Some(hex::encode(secret));
        self
    }
}
