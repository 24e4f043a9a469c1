//! Single-step execution.
//!
//! A step is one provisioning action wrapped in the workflow's policies:
//! a per-step timeout, bounded retry for transient failures, an optional
//! recovery guard, and event logging for every attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{Action, StepExecutor, StepFailure, StepOutput};
use crate::domain::{EventKind, StateStatus, WorkflowEvent};

use super::event_store::{generate_idempotency_key, EventStore};
use super::policy::{RecoveryGuard, RetryPolicy};

/// Shared machinery for executing workflow steps.
///
/// One runner is built per run and shared with the fan-out tasks, so
/// every step of a run logs into the same event store with the same
/// policies.
pub(crate) struct StepRunner {
    pub executor: Arc<dyn StepExecutor>,
    pub store: Arc<EventStore>,
    pub retry: RetryPolicy,
    pub step_timeout: Duration,
    pub run_id: Uuid,
}

/// How a guarded step finished
pub(crate) enum StepOutcome {
    /// The action succeeded
    Completed(StepOutput),

    /// The action's resource already existed and the guard absorbed the
    /// failure; carries the absorbed failure for logging
    Recovered(StepFailure),
}

impl StepRunner {
    /// Execute one action under the run's policies.
    ///
    /// Returns `Err` only for unguarded, non-retryable (or retry-exhausted)
    /// failures; the error wraps the originating [`StepFailure`].
    pub(crate) async fn run_step(
        &self,
        state: &str,
        action: &Action,
        guard: Option<RecoveryGuard>,
    ) -> Result<StepOutcome> {
        let payload = serde_json::to_string(action).context("Failed to serialize action")?;
        let idem_key = generate_idempotency_key(self.run_id, state, &payload);

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let step_start = Instant::now();

            let start_event = WorkflowEvent::new(
                self.run_id,
                Some(state.to_string()),
                EventKind::StateStarted,
                idem_key.clone(),
                format!("State '{}' attempt {}", state, attempt),
                StateStatus::Running,
            );
            self.store.append(&start_event).await?;

            let result = match timeout(self.step_timeout, self.executor.execute(action)).await {
                Ok(result) => result,
                Err(_) => Err(StepFailure::Transient {
                    action: action.kind(),
                    message: format!("timed out after {:?}", self.step_timeout),
                }),
            };

            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    let complete_event = WorkflowEvent::new(
                        self.run_id,
                        Some(state.to_string()),
                        EventKind::StateCompleted,
                        idem_key,
                        format!("State '{}' completed in {}ms", state, duration_ms),
                        StateStatus::Completed,
                    )
                    .with_duration(duration_ms);
                    self.store.append(&complete_event).await?;

                    return Ok(StepOutcome::Completed(output));
                }
                Err(failure) => {
                    if let Some(guard) = guard {
                        if guard.absorbs(&failure) {
                            let recovered_event = WorkflowEvent::new(
                                self.run_id,
                                Some(state.to_string()),
                                EventKind::StateRecovered,
                                idem_key,
                                format!(
                                    "State '{}' found its resource provisioned, moving on",
                                    state
                                ),
                                StateStatus::Recovered,
                            )
                            .with_duration(duration_ms)
                            .with_error(failure.to_string());
                            self.store.append(&recovered_event).await?;

                            info!(state, %failure, "resource already provisioned, moving on");
                            return Ok(StepOutcome::Recovered(failure));
                        }
                    }

                    if failure.is_transient() && self.retry.should_retry(attempt) {
                        let delay = self.retry.delay_for_attempt(attempt);

                        let retry_event = WorkflowEvent::new(
                            self.run_id,
                            Some(state.to_string()),
                            EventKind::StateRetrying,
                            format!("{}:retry:{}", idem_key, attempt),
                            format!(
                                "State '{}' failed, retrying in {:?}: {}",
                                state, delay, failure
                            ),
                            StateStatus::Running,
                        )
                        .with_error(failure.to_string());
                        self.store.append(&retry_event).await?;

                        warn!(
                            state,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %failure,
                            "step failed, retrying"
                        );

                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let fail_event = WorkflowEvent::new(
                        self.run_id,
                        Some(state.to_string()),
                        EventKind::StateFailed,
                        idem_key,
                        format!(
                            "State '{}' failed after {} attempts: {}",
                            state, attempt, failure
                        ),
                        StateStatus::Failed,
                    )
                    .with_duration(duration_ms)
                    .with_error(failure.to_string());
                    self.store.append(&fail_event).await?;

                    error!(state, attempt, %failure, "step failed permanently");

                    return Err(failure.into());
                }
            }
        }
    }
}
