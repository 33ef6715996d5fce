/*!
 * Kernel Assembly
 * Builder wiring collaborators into the executor, plus the public facade
 *
 * Every collaborator has an in-process default, so `KernelBuilder::new()
 * .build()` yields a working kernel backed by memory stores, the system
 * clock, tracing sinks and `/proc` sampling.
 */

use super::context::SecurityContext;
use super::idempotency::IdempotencyRegistry;
use super::kernel::{ExecutorParts, OperationExecutor};
use super::operation::{Operation, OperationResult};
use crate::cache::{CacheLayer, CacheStats, CacheStore, KeyedHasher, MemoryCacheStore};
use crate::core::clock::{Clock, IdGenerator, RandomIdGenerator, SystemClock};
use crate::core::config::KernelConfig;
use crate::core::errors::KernelResult;
use crate::core::limits::{CACHE_MAX_ENTRIES, CACHE_SECRET_LEN};
use crate::core::types::SnapshotId;
use crate::monitoring::{
    AlertDispatcher, AuditRecorder, AuditSink, CompositeAuditSink, MetricsCollector,
    MetricsSnapshot, Notifier, OperationRecorder, ProcSampler, ResourceSampler, TracingAuditSink,
    TracingNotifier,
};
use crate::permissions::{
    MemoryPermissionStore, PermissionChecker, PermissionResolver, PermissionStore, Role, RoleData,
};
use crate::recovery::{EmergencyState, RecoveryManager, RestoreMode, RestoreReport};
use crate::store::{MemoryStore, TransactionalStore};
use crate::validation::{RateLimiter, ValidationPipeline};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds a [`Kernel`]
pub struct KernelBuilder {
    config: KernelConfig,
    store: Option<Arc<dyn TransactionalStore>>,
    permission_store: Option<Arc<dyn PermissionStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    notifier: Option<Arc<dyn Notifier>>,
    audit_sinks: Vec<Arc<dyn AuditSink>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            store: None,
            permission_store: None,
            cache_store: None,
            clock: None,
            ids: None,
            notifier: None,
            audit_sinks: Vec::new(),
            sampler: None,
        }
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_permission_store(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.permission_store = Some(store);
        self
    }

    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Add an audit sink; with several, every record goes to each
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sinks.push(sink);
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn build(self) -> KernelResult<Kernel> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self.ids.unwrap_or_else(|| Arc::new(RandomIdGenerator));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::with_lock_timeout(config.lock_timeout)));
        let permission_store = self
            .permission_store
            .unwrap_or_else(|| Arc::new(MemoryPermissionStore::new()));
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(MemoryCacheStore::new(CACHE_MAX_ENTRIES)));

        let secret = match config.secret_bytes()? {
            Some(secret) => secret,
            None => ids.secret(CACHE_SECRET_LEN),
        };
        let cache = Arc::new(CacheLayer::new(
            cache_store,
            KeyedHasher::new(&secret)?,
            clock.clone(),
            config.cache_default_ttl,
        ));

        let resolver = Arc::new(
            PermissionResolver::new(permission_store, cache.clone())?
                .with_max_depth(config.max_role_depth)
                .with_cache_ttl(config.permission_cache_ttl),
        );
        let checker: Arc<dyn PermissionChecker> = resolver.clone();
        let pipeline = ValidationPipeline::new(
            checker,
            RateLimiter::new(cache.clone(), config.rate_limit.clone()),
            clock.clone(),
            &config,
        );

        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));
        let alerts = Arc::new(AlertDispatcher::new(notifier));
        let recovery = Arc::new(RecoveryManager::new(
            store.clone(),
            alerts.clone(),
            clock.clone(),
            config.lock_timeout,
        ));

        let metrics = Arc::new(MetricsCollector::new());
        let mut sinks = self.audit_sinks;
        let sink: Arc<dyn AuditSink> = match sinks.len() {
            0 => Arc::new(TracingAuditSink),
            1 => sinks.remove(0),
            _ => Arc::new(CompositeAuditSink::new(sinks)),
        };
        let recorder = OperationRecorder::new(
            AuditRecorder::with_capacity(sink, config.audit_queue_capacity),
            metrics.clone(),
            alerts,
            self.sampler.unwrap_or_else(|| Arc::new(ProcSampler::new())),
            config.thresholds.clone(),
        );

        let executor = OperationExecutor::new(ExecutorParts {
            store: store.clone(),
            resolver: resolver.clone(),
            pipeline,
            cache: cache.clone(),
            recovery: recovery.clone(),
            recorder,
            idempotency: IdempotencyRegistry::new(clock, config.idempotency_window),
            ids,
            config: config.clone(),
        });

        info!(
            max_role_depth = config.max_role_depth,
            rate_limit = config.rate_limit.max_requests,
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            "Kernel assembled"
        );

        Ok(Kernel {
            config,
            executor,
            resolver,
            cache,
            recovery,
            metrics,
            store,
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// What the rest of the application talks to
pub struct Kernel {
    config: Arc<KernelConfig>,
    executor: OperationExecutor,
    resolver: Arc<PermissionResolver>,
    cache: Arc<CacheLayer>,
    recovery: Arc<RecoveryManager>,
    metrics: Arc<MetricsCollector>,
    store: Arc<dyn TransactionalStore>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub fn execute_critical(
        &self,
        operation: &dyn Operation,
        context: &SecurityContext,
    ) -> KernelResult<OperationResult> {
        self.executor.execute_critical(operation, context)
    }

    // Permissions

    pub fn check_permission(&self, user: &str, permission: &str) -> bool {
        self.resolver.check_permission(user, permission)
    }

    pub fn create_role(&self, data: RoleData) -> KernelResult<Role> {
        self.resolver.create_role(data)
    }

    pub fn assign_role(&self, user: &str, role: &str) -> KernelResult<()> {
        self.resolver.assign_role(user, role)
    }

    pub fn revoke_role(&self, user: &str, role: &str) -> KernelResult<bool> {
        self.resolver.revoke_role(user, role)
    }

    pub fn validate_role_hierarchy(&self, role: &str, proposed_parent: &str) -> bool {
        self.resolver.validate_role_hierarchy(role, proposed_parent)
    }

    /// Full role management surface
    pub fn permissions(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }

    // Cache

    pub fn remember<V, E, F>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V, E>,
    {
        self.cache.remember(key, ttl, producer)
    }

    pub fn remember_tagged<V, E, F>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[String],
        producer: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V, E>,
    {
        self.cache.remember_tagged(key, ttl, tags, producer)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.cache.invalidate_tag(tag)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // Snapshots

    /// Open a snapshot capturing the committed values of `keys`
    pub fn create_snapshot(&self, keys: &[&str]) -> KernelResult<SnapshotId> {
        let id = self.recovery.create_snapshot(None);
        for key in keys {
            if let Err(e) = self.recovery.capture_committed(id, key) {
                self.recovery.discard(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Write every captured value and artifact back
    pub fn restore(&self, id: SnapshotId) -> KernelResult<RestoreReport> {
        self.recovery.restore(id, RestoreMode::Full)
    }

    pub fn discard_snapshot(&self, id: SnapshotId) -> bool {
        self.recovery.discard(id)
    }

    pub fn emergency(&self) -> Option<EmergencyState> {
        self.recovery.emergency()
    }

    pub fn clear_emergency(&self, operator: &str) -> bool {
        self.recovery.clear_emergency(operator)
    }

    // Monitoring

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait for deferred audit records and alerts
    pub fn flush(&self, timeout: Duration) -> bool {
        self.executor.flush(timeout)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TransactionalStore> {
        &self.store
    }

    pub fn executor(&self) -> &OperationExecutor {
        &self.executor
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }
}
