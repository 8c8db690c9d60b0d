//! Saga orchestrator: sequential execution with reverse-order compensation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use common::{SagaId, with_saga_id};
use rpc::{InvokeOptions, RpcInvoker};
use tracing::{debug, error, info, warn};

use crate::definitions::SagaDefinition;
use crate::error::{CompensationError, Result, SagaError, StepExecutionError};
use crate::saga::{Saga, SagaOutcome, SagaType};
use crate::state::SagaStatus;
use crate::step::SagaStep;
use crate::store::SagaStore;

/// Error recorded on a saga found mid-execution by a recovery sweep.
pub const INTERRUPTED_ERROR: &str = "Saga interrupted before completion";

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Timeout for every forward and compensating call.
    pub step_timeout: Duration,
    /// Breaker options for saga calls. `timeout` is replaced by
    /// `step_timeout`; the gate settings only take effect on breakers the
    /// orchestrator creates.
    pub breaker: InvokeOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            breaker: InvokeOptions::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn breaker(mut self, options: InvokeOptions) -> Self {
        self.breaker = options;
        self
    }

    /// Options handed to the invoker for each step call.
    pub fn call_options(&self) -> InvokeOptions {
        self.breaker.clone().timeout(self.step_timeout)
    }
}

/// Drives sagas from Pending to a terminal state.
///
/// Steps run strictly in order. When a step fails, every step completed before
/// it is compensated in reverse order, and the saga ends Compensated even if
/// individual compensations fail (see [`Saga::rollback_report`]).
///
/// A saga ID can only be executing once per orchestrator at a time.
pub struct SagaOrchestrator<S: SagaStore> {
    store: S,
    invoker: Arc<RpcInvoker>,
    config: OrchestratorConfig,
    running: Mutex<HashSet<SagaId>>,
}

impl<S: SagaStore> SagaOrchestrator<S> {
    /// Creates an orchestrator with the default config.
    pub fn new(store: S, invoker: Arc<RpcInvoker>) -> Self {
        Self::with_config(store, invoker, OrchestratorConfig::default())
    }

    pub fn with_config(store: S, invoker: Arc<RpcInvoker>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            invoker,
            config,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn invoker(&self) -> &Arc<RpcInvoker> {
        &self.invoker
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns true if `saga_id` is executing in this process.
    pub fn is_running(&self, saga_id: SagaId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&saga_id)
    }

    /// Creates and stores a Pending saga. Does not start it.
    ///
    /// Every non-local step must name a registered service.
    #[tracing::instrument(skip(self, steps), fields(steps = steps.len()))]
    pub async fn create_saga(&self, saga_type: SagaType, steps: Vec<SagaStep>) -> Result<Saga> {
        for step in &steps {
            if !step.is_local() && !self.invoker.services().contains(step.service()) {
                error!(
                    step_id = step.step_id(),
                    service = step.service(),
                    "saga step targets unknown service"
                );
                return Err(SagaError::UnknownService {
                    step_id: step.step_id().to_string(),
                    service: step.service().to_string(),
                });
            }
        }

        let saga = Saga::new(saga_type, steps)?;
        self.store.insert(&saga).await?;

        info!(saga_id = %saga.id(), %saga_type, "saga created");
        Ok(saga)
    }

    /// Creates a saga from a predefined definition.
    pub async fn create_from(&self, definition: SagaDefinition) -> Result<Saga> {
        self.create_saga(definition.saga_type, definition.steps).await
    }

    /// Runs a Pending saga to a terminal state.
    ///
    /// Step failures never surface as `Err`; they produce a failed
    /// [`SagaOutcome`] carrying the failing step's error. `Err` is reserved for
    /// an unknown ID, re-entry, a saga that is not Pending, and a store failure
    /// before the first step runs.
    ///
    /// Once the saga has started, store writes are best effort: the in-memory
    /// saga drives execution and compensation, and a failed write is logged.
    #[tracing::instrument(skip(self))]
    pub async fn execute_saga(&self, saga_id: SagaId) -> Result<SagaOutcome> {
        let _guard = self.claim(saga_id)?;

        let mut saga = self
            .store
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;

        if !saga.status().can_start() {
            return Err(SagaError::InvalidState {
                expected: SagaStatus::Pending.to_string(),
                actual: saga.status(),
            });
        }

        let saga_type = saga.saga_type().as_str();
        metrics::counter!("saga_executions_total", "saga_type" => saga_type).increment(1);
        let saga_start = std::time::Instant::now();

        saga.start()?;
        self.store.save(&saga).await?;
        info!(%saga_id, %saga_type, "saga started");

        let options = self.config.call_options();
        for index in 0..saga.steps().len() {
            let step = &saga.steps()[index];

            if step.is_local() {
                debug!(%saga_id, step_id = step.step_id(), "local step completed");
                saga.complete_step(index, None)?;
                self.save_best_effort(&saga).await;
                continue;
            }

            let payload = with_saga_id(step.data(), saga_id);
            match self
                .invoker
                .invoke(step.service(), step.action(), payload, &options)
                .await
            {
                Ok(reply) => {
                    debug!(%saga_id, step_id = step.step_id(), "saga step completed");
                    saga.complete_step(index, Some(reply))?;
                    self.save_best_effort(&saga).await;
                }
                Err(source) => {
                    let failure = StepExecutionError {
                        step_id: step.step_id().to_string(),
                        source,
                    };
                    warn!(%saga_id, error = %failure, "saga step failed");

                    let message = failure.source.to_string();
                    saga.fail_step(index, message.clone())?;
                    saga.fail(message.clone())?;
                    self.save_best_effort(&saga).await;

                    if let Err(e) = self.compensate(&mut saga, &options).await {
                        error!(%saga_id, error = %e, "compensation pass failed");
                    }

                    metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type)
                        .record(saga_start.elapsed().as_secs_f64());
                    metrics::counter!("saga_compensated", "saga_type" => saga_type).increment(1);
                    warn!(%saga_id, reason = %message, "saga compensated");

                    return Ok(SagaOutcome::failure(message));
                }
            }
        }

        saga.complete()?;
        self.save_best_effort(&saga).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type).record(duration);
        metrics::counter!("saga_completed", "saga_type" => saga_type).increment(1);
        info!(%saga_id, duration, "saga completed successfully");

        Ok(SagaOutcome::success())
    }

    /// Undoes completed steps in reverse order. Best effort: a failing
    /// compensation is recorded on its step and the pass continues.
    #[tracing::instrument(skip(self, saga, options), fields(saga_id = %saga.id()))]
    async fn compensate(&self, saga: &mut Saga, options: &InvokeOptions) -> Result<()> {
        let saga_id = saga.id();
        saga.begin_compensation()?;
        self.save_best_effort(saga).await;

        for index in saga.completed_step_indexes().into_iter().rev() {
            let step = &saga.steps()[index];
            let Some(compensation) = step.compensation() else {
                warn!(%saga_id, step_id = step.step_id(), "step has no compensation, skipping");
                continue;
            };

            if step.is_local() {
                debug!(%saga_id, step_id = step.step_id(), "local step compensated");
                saga.compensate_step(index)?;
                self.save_best_effort(saga).await;
                continue;
            }

            let payload = with_saga_id(&compensation.data, saga_id);
            match self
                .invoker
                .invoke(step.service(), &compensation.action, payload, options)
                .await
            {
                Ok(_) => {
                    info!(%saga_id, step_id = step.step_id(), "compensation step completed");
                    saga.compensate_step(index)?;
                }
                Err(source) => {
                    let failure = CompensationError {
                        step_id: step.step_id().to_string(),
                        source,
                    };
                    warn!(%saga_id, error = %failure, "compensation step failed");
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    saga.record_compensation_failure(index, failure.source.to_string());
                }
            }
            self.save_best_effort(saga).await;
        }

        saga.finish_compensation()?;
        self.store.save(saga).await?;
        Ok(())
    }

    /// Looks up a saga. Never mutates it.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        Ok(self.store.get(saga_id).await?)
    }

    /// Deletes finished sagas (Completed, Compensated, Failed) whose last
    /// transition is at least `max_age` old. Sagas executing in this process
    /// are skipped. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_old_sagas(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let candidates = self
            .store
            .list_by_status(&SagaStatus::PURGEABLE)
            .await?;

        let mut removed = 0;
        for saga in candidates {
            if saga.updated_at() > cutoff || self.is_running(saga.id()) {
                continue;
            }
            if self.store.delete(saga.id()).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            metrics::counter!("saga_cleaned_up_total").increment(removed as u64);
            info!(removed, "old sagas cleaned up");
        }
        Ok(removed)
    }

    /// Compensates sagas left mid-flight by a previous process.
    ///
    /// Every stored saga in InProgress, Failed or Compensating that is not
    /// executing here is rolled back over its completed steps and ends
    /// Compensated. Returns the IDs recovered.
    #[tracing::instrument(skip(self))]
    pub async fn recover_incomplete(&self) -> Result<Vec<SagaId>> {
        let candidates = self
            .store
            .list_by_status(&SagaStatus::RECOVERABLE)
            .await?;

        let options = self.config.call_options();
        let mut recovered = Vec::new();
        for mut saga in candidates {
            let saga_id = saga.id();
            let Ok(_guard) = self.claim(saga_id) else {
                continue;
            };

            if saga.status() == SagaStatus::InProgress {
                saga.fail(INTERRUPTED_ERROR)?;
                self.store.save(&saga).await?;
            }

            match self.compensate(&mut saga, &options).await {
                Ok(()) => {
                    warn!(%saga_id, "interrupted saga compensated");
                    metrics::counter!("saga_compensated", "saga_type" => saga.saga_type().as_str())
                        .increment(1);
                    recovered.push(saga_id);
                }
                Err(e) => error!(%saga_id, error = %e, "saga recovery failed"),
            }
        }

        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovery sweep finished");
        }
        Ok(recovered)
    }

    async fn save_best_effort(&self, saga: &Saga) {
        if let Err(e) = self.store.save(saga).await {
            error!(saga_id = %saga.id(), status = %saga.status(), error = %e, "failed to persist saga");
        }
    }

    fn claim(&self, saga_id: SagaId) -> Result<RunningGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(saga_id) {
            return Err(SagaError::AlreadyRunning(saga_id));
        }
        Ok(RunningGuard {
            running: &self.running,
            saga_id,
        })
    }
}

/// Marks a saga as executing until dropped.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<SagaId>>,
    saga_id: SagaId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.saga_id);
    }
}
