/*!
 * Operation Executor
 *
 * Runs an operation body inside the protective envelope:
 *
 * 1. Emergency gate (mutating operations only)
 * 2. Context and security validation
 * 3. Idempotent replay or read-only result cache
 * 4. Transaction, row lock on the target resource, snapshot
 * 5. Input and business-rule validation against the locked record
 * 6. Body, with panics caught
 * 7. Result validation, commit, snapshot discard, cache invalidation
 *
 * Any failure after the transaction opens rolls back. Once the body has
 * run, failures also restore the snapshot. Every attempt produces exactly
 * one audit record, written after commit.
 */

use super::context::SecurityContext;
use super::idempotency::{Claim, ClaimGuard, IdempotencyRegistry};
use super::operation::{Operation, OperationDescriptor, OperationResult, ValidationStatus};
use super::scope::OperationScope;
use crate::cache::{compose_key, CacheLayer};
use crate::core::clock::IdGenerator;
use crate::core::config::KernelConfig;
use crate::core::errors::{KernelError, KernelResult};
use crate::core::guard::{ExecutionState, TransactionGuard};
use crate::core::types::{resource_key, OperationId, Record, SnapshotId};
use crate::monitoring::{Attempt, OperationRecorder, OperationSpan, Outcome};
use crate::permissions::PermissionResolver;
use crate::recovery::{RecoveryManager, RestoreMode};
use crate::store::TransactionalStore;
use crate::validation::ValidationPipeline;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything the executor is wired to
pub(crate) struct ExecutorParts {
    pub store: Arc<dyn TransactionalStore>,
    pub resolver: Arc<PermissionResolver>,
    pub pipeline: ValidationPipeline,
    pub cache: Arc<CacheLayer>,
    pub recovery: Arc<RecoveryManager>,
    pub recorder: OperationRecorder,
    pub idempotency: IdempotencyRegistry,
    pub ids: Arc<dyn IdGenerator>,
    pub config: Arc<KernelConfig>,
}

/// Failed attempt, classified for the audit trail
struct Failure {
    error: KernelError,
    outcome: Outcome,
}

impl Failure {
    fn rejected(error: impl Into<KernelError>) -> Self {
        Self {
            error: error.into(),
            outcome: Outcome::Rejected,
        }
    }
}

type Attempted = Result<(OperationResult, Outcome), Failure>;

pub struct OperationExecutor {
    store: Arc<dyn TransactionalStore>,
    resolver: Arc<PermissionResolver>,
    pipeline: ValidationPipeline,
    cache: Arc<CacheLayer>,
    recovery: Arc<RecoveryManager>,
    recorder: OperationRecorder,
    idempotency: IdempotencyRegistry,
    ids: Arc<dyn IdGenerator>,
    config: Arc<KernelConfig>,
}

impl OperationExecutor {
    pub(crate) fn new(parts: ExecutorParts) -> Self {
        Self {
            store: parts.store,
            resolver: parts.resolver,
            pipeline: parts.pipeline,
            cache: parts.cache,
            recovery: parts.recovery,
            recorder: parts.recorder,
            idempotency: parts.idempotency,
            ids: parts.ids,
            config: parts.config,
        }
    }

    /// Run `operation` for `context`, returning its verified result
    ///
    /// Errors are typed by kind: validation and security failures leave
    /// state untouched; system failures have been rolled back and restored.
    pub fn execute_critical(
        &self,
        operation: &dyn Operation,
        context: &SecurityContext,
    ) -> KernelResult<OperationResult> {
        let descriptor = operation.descriptor();
        let operation_id = self.ids.operation_id();
        let span = OperationSpan::new(
            operation_id,
            &descriptor.op_type,
            context.user(),
            self.config.thresholds.max_duration,
        );
        let _entered = span.enter();
        let started = Instant::now();
        let mut state = ExecutionState::Pending;

        let attempt = self.run(operation, context, operation_id, &mut state, &span);
        let duration = started.elapsed();

        let (outcome, error) = match &attempt {
            Ok((_, outcome)) => {
                span.record_success();
                (*outcome, None)
            }
            Err(failure) => {
                span.record_error(failure.error.kind());
                (failure.outcome, Some(&failure.error))
            }
        };
        self.recorder.record_attempt(Attempt {
            operation_id,
            op_type: &descriptor.op_type,
            context: context.audit_summary(&self.resolver),
            outcome,
            duration,
            error,
        });

        attempt
            .map(|(result, _)| result)
            .map_err(|failure| failure.error)
    }

    fn run(
        &self,
        operation: &dyn Operation,
        context: &SecurityContext,
        operation_id: OperationId,
        state: &mut ExecutionState,
        span: &OperationSpan,
    ) -> Attempted {
        let descriptor = operation.descriptor();
        step(state, ExecutionState::Validating, span).map_err(Failure::rejected)?;

        if descriptor.mutating {
            self.recovery
                .ensure_writable()
                .map_err(Failure::rejected)?;
        }
        self.pipeline
            .validate_context(context)
            .map_err(Failure::rejected)?;
        self.pipeline
            .validate_security(descriptor, context)
            .map_err(Failure::rejected)?;

        let claim = match &descriptor.idempotency_key {
            Some(template) => {
                let key = idempotency_key(descriptor, context, template);
                match self.idempotency.claim(&key).map_err(Failure::rejected)? {
                    Claim::Replay(result) => {
                        info!(%operation_id, key = %key, "Replaying idempotent result");
                        return Ok((result.with_status(ValidationStatus::Replayed), Outcome::Replayed));
                    }
                    Claim::Fresh(guard) => Some(guard),
                }
            }
            None => None,
        };

        let cache_key = result_cache_key(descriptor, context);
        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get::<OperationResult>(key) {
                debug!(%operation_id, "Serving cached result");
                return Ok((cached.with_status(ValidationStatus::Replayed), Outcome::Replayed));
            }
        }

        self.transact(operation, context, operation_id, state, span, claim, cache_key)
    }

    #[allow(clippy::too_many_arguments)]
    fn transact(
        &self,
        operation: &dyn Operation,
        context: &SecurityContext,
        operation_id: OperationId,
        state: &mut ExecutionState,
        span: &OperationSpan,
        claim: Option<ClaimGuard<'_>>,
        cache_key: Option<String>,
    ) -> Attempted {
        let descriptor = operation.descriptor();
        let row = resource_key(context.resource().unwrap_or_default());

        let mut tx = TransactionGuard::begin(self.store.as_ref(), Some(operation_id))
            .map_err(|e| Failure::rejected(KernelError::from(e)))?;
        let current = lock_row(&mut tx, &row, descriptor, self.config.lock_timeout)
            .map_err(Failure::rejected)?;
        let snapshot = descriptor
            .mutating
            .then(|| self.recovery.create_snapshot(Some(operation_id)));

        if let Err(e) =
            self.pipeline
                .validate_input(descriptor, operation.input(), current.as_ref())
        {
            self.abandon(tx, snapshot, state, span);
            return Err(Failure::rejected(e));
        }
        if let Err(e) = step(state, ExecutionState::Executing, span) {
            self.abandon(tx, snapshot, state, span);
            return Err(Failure::rejected(e));
        }

        let recovery = self.recovery.as_ref();
        let lock_timeout = self.config.lock_timeout;
        let body = tx.execute(|txn| {
            let mut scope =
                OperationScope::new(operation_id, context, txn, recovery, snapshot, lock_timeout);
            operation.execute(&mut scope)
        });

        let result = match body {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(self.fail(tx, snapshot, state, span, e)),
            Err(poisoned) => return Err(self.fail(tx, snapshot, state, span, poisoned.into())),
        };

        if let Err(e) = step(state, ExecutionState::Verifying, span) {
            return Err(self.fail(tx, snapshot, state, span, e));
        }
        if let Err(e) = self.pipeline.validate_result(descriptor, &result) {
            return Err(self.fail(tx, snapshot, state, span, e));
        }

        if let Err(e) = tx.commit() {
            error!(%operation_id, error = %e, "Commit failed");
            let _ = step(state, ExecutionState::RolledBack, span);
            return Err(self.recover(snapshot, RestoreMode::Full, state, span, e.into()));
        }
        let _ = step(state, ExecutionState::Committed, span);

        if let Some(id) = snapshot {
            self.recovery.discard(id);
        }
        let result = result.with_status(ValidationStatus::Verified);

        if descriptor.mutating {
            self.cache.invalidate_tag(&row);
        } else if let Some(key) = &cache_key {
            self.cache
                .put(key, &result, self.cache.default_ttl(), &[row.clone()]);
        }
        if let Some(claim) = claim {
            claim.complete(&result);
        }

        info!(%operation_id, op_type = %descriptor.op_type, "Operation committed");
        Ok((result, Outcome::Committed))
    }

    /// Roll back before the body ran; nothing to restore
    fn abandon(
        &self,
        tx: TransactionGuard,
        snapshot: Option<SnapshotId>,
        state: &mut ExecutionState,
        span: &OperationSpan,
    ) {
        let _ = step(state, ExecutionState::RolledBack, span);
        if let Err(e) = tx.rollback() {
            warn!(error = %e, "Rollback of rejected operation failed");
        }
        if let Some(id) = snapshot {
            self.recovery.discard(id);
        }
    }

    /// Roll back after the body ran, then restore the snapshot
    fn fail(
        &self,
        tx: TransactionGuard,
        snapshot: Option<SnapshotId>,
        state: &mut ExecutionState,
        span: &OperationSpan,
        error: KernelError,
    ) -> Failure {
        let _ = step(state, ExecutionState::RolledBack, span);
        let mode = match tx.rollback() {
            Ok(()) => RestoreMode::ArtifactsOnly,
            Err(e) => {
                error!(error = %e, "Rollback failed, restoring records from snapshot");
                RestoreMode::Full
            }
        };
        self.recover(snapshot, mode, state, span, error)
    }

    fn recover(
        &self,
        snapshot: Option<SnapshotId>,
        mode: RestoreMode,
        state: &mut ExecutionState,
        span: &OperationSpan,
        error: KernelError,
    ) -> Failure {
        warn!(error = %error, kind = error.kind().as_str(), "Operation rolled back");

        if let Some(id) = snapshot {
            if let Err(recovery_error) = self.recovery.restore(id, mode) {
                let _ = step(state, ExecutionState::RecoveryFailed, span);
                error!(
                    snapshot_id = %id,
                    original_error = %error,
                    "Snapshot restore failed"
                );
                return Failure {
                    error: recovery_error,
                    outcome: Outcome::RecoveryFailed,
                };
            }
        }

        Failure {
            error,
            outcome: Outcome::RolledBack,
        }
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn recorder(&self) -> &OperationRecorder {
        &self.recorder
    }

    pub fn idempotency(&self) -> &IdempotencyRegistry {
        &self.idempotency
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Wait for deferred audit records and alerts
    pub fn flush(&self, timeout: Duration) -> bool {
        self.recorder.flush(timeout)
    }
}

fn step(
    state: &mut ExecutionState,
    to: ExecutionState,
    span: &OperationSpan,
) -> KernelResult<()> {
    state.advance(to)?;
    span.record_state(to.as_str());
    Ok(())
}

/// Mutating operations lock the row; read-only ones read committed state
fn lock_row(
    tx: &mut TransactionGuard,
    row: &str,
    descriptor: &OperationDescriptor,
    lock_timeout: Duration,
) -> KernelResult<Option<Record>> {
    let txn = tx.transaction()?;
    let current = if descriptor.mutating {
        txn.get_for_update(row, lock_timeout)?
    } else {
        txn.get(row)?
    };
    Ok(current)
}

fn result_cache_key(descriptor: &OperationDescriptor, context: &SecurityContext) -> Option<String> {
    if descriptor.mutating {
        return None;
    }
    descriptor
        .cache_key
        .as_ref()
        .map(|template| {
            let rendered = context.render(template, &descriptor.op_type);
            compose_key("result", &[&descriptor.op_type, context.user(), &rendered])
        })
}

/// Always scoped to the operation type and the acting user
fn idempotency_key(
    descriptor: &OperationDescriptor,
    context: &SecurityContext,
    template: &str,
) -> String {
    let rendered = context.render(template, &descriptor.op_type);
    compose_key("idem", &[&descriptor.op_type, context.user(), &rendered])
}
