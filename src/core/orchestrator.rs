//! Registration workflow state machine.
//!
//! The orchestrator is a pure sequencer: it walks a fixed transition
//! table one state at a time, with no branching beyond the recovery
//! guards and the table fan-out. Collaborators are injected, so the same
//! machine runs against any provisioning backend or bus.
//!
//! Order of states:
//! register_location -> grant_admin_access -> grant_producer_access ->
//! create_database -> update_database_metadata -> fan_out_tables ->
//! publish_notification.
//!
//! Any unguarded failure ends the run in `Failed`, carrying the state
//! name and the originating failure so the caller can diagnose and
//! re-submit the same request. Re-submission is safe: the guarded states
//! absorb already-exists failures from the earlier attempt.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Action, EventPublisher, Principal, ResourceKind, StepExecutor};
use crate::config::ExecutionSettings;
use crate::domain::{
    EventKind, NotificationEvent, Run, RunContext, RunState, StateStatus, WorkflowEvent,
    WorkflowRequest,
};

use super::cancel::CancelToken;
use super::event_store::{generate_idempotency_key, EventStore};
use super::fanout;
use super::policy::RecoveryGuard;
use super::step::{StepOutcome, StepRunner};

/// States of the registration workflow, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// Register the data product's storage location
    RegisterLocation,

    /// Grant the governance admin role access to the location
    GrantAdminAccess,

    /// Grant the producer account access to the location
    GrantProducerAccess,

    /// Create the central database for the product
    CreateDatabase,

    /// Record owner and PII metadata on the database
    UpdateDatabaseMetadata,

    /// Create and grant every table in the request
    FanOutTables,

    /// Notify the producer account over the bus
    PublishNotification,
}

impl WorkflowState {
    /// State name as recorded in the run log
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterLocation => "register_location",
            Self::GrantAdminAccess => "grant_admin_access",
            Self::GrantProducerAccess => "grant_producer_access",
            Self::CreateDatabase => "create_database",
            Self::UpdateDatabaseMetadata => "update_database_metadata",
            Self::FanOutTables => "fan_out_tables",
            Self::PublishNotification => "publish_notification",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Main workflow orchestrator
pub struct Orchestrator {
    /// Provisioning backend
    executor: Arc<dyn StepExecutor>,

    /// Bus for the completion notification
    publisher: Arc<dyn EventPublisher>,

    /// Step timeout and retry settings
    settings: ExecutionSettings,

    /// Where run event logs are written
    runs_dir: PathBuf,
}

impl Orchestrator {
    /// Create an orchestrator using the resolved configuration
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let config = crate::config::config()?;

        Ok(Self::with_settings(
            executor,
            publisher,
            config.execution.clone(),
            crate::config::runs_dir()?,
        ))
    }

    /// Create an orchestrator with explicit settings and runs directory
    pub fn with_settings(
        executor: Arc<dyn StepExecutor>,
        publisher: Arc<dyn EventPublisher>,
        settings: ExecutionSettings,
        runs_dir: PathBuf,
    ) -> Self {
        Self {
            executor,
            publisher,
            settings,
            runs_dir,
        }
    }

    /// Execute a registration request end to end
    #[instrument(skip(self, request), fields(account = %request.producer_account_id, database = %request.database_name))]
    pub async fn run(&self, request: WorkflowRequest) -> Result<Run> {
        self.run_with_cancel(request, &CancelToken::new()).await
    }

    /// Execute a registration request, stopping between states once the
    /// token is cancelled
    pub async fn run_with_cancel(
        &self,
        request: WorkflowRequest,
        cancel: &CancelToken,
    ) -> Result<Run> {
        // Fail fast, before any external side effect or event
        request
            .validate()
            .context("Invalid registration request")?;

        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting registration workflow");

        let store = Arc::new(EventStore::open_in(&self.runs_dir, run_id).await?);
        let mut run = Run::new(run_id, &request);

        let start_event = WorkflowEvent::new(
            run_id,
            None,
            EventKind::RunStarted,
            format!("{}:start", run_id),
            format!(
                "Registration of '{}' for account {} started",
                run.central_database_name, run.producer_account_id
            ),
            StateStatus::Running,
        )
        .with_context(RunContext {
            producer_account_id: run.producer_account_id.clone(),
            database_name: run.database_name.clone(),
            central_database_name: run.central_database_name.clone(),
        });
        store.append(&start_event).await?;

        let runner = Arc::new(StepRunner {
            executor: Arc::clone(&self.executor),
            store: Arc::clone(&store),
            retry: self.settings.retry.clone(),
            step_timeout: self.settings.step_timeout(),
            run_id,
        });

        // Linear provisioning states
        for (state, guard, action) in Self::provisioning_steps(&request) {
            if cancel.is_cancelled() {
                return self.cancel_run(&store, &mut run, state.name()).await;
            }

            run.state_statuses
                .insert(state.name().to_string(), StateStatus::Running);

            match runner.run_step(state.name(), &action, guard).await {
                Ok(StepOutcome::Completed(_)) => {
                    run.state_statuses
                        .insert(state.name().to_string(), StateStatus::Completed);
                }
                Ok(StepOutcome::Recovered(_)) => {
                    run.state_statuses
                        .insert(state.name().to_string(), StateStatus::Recovered);
                }
                Err(e) => return self.fail_run(&store, &mut run, state.name(), e).await,
            }
        }

        // Fan out over the request's tables
        if cancel.is_cancelled() {
            return self
                .cancel_run(&store, &mut run, WorkflowState::FanOutTables.name())
                .await;
        }

        let fan_out = WorkflowState::FanOutTables.name();
        run.state_statuses
            .insert(fan_out.to_string(), StateStatus::Running);

        let tables_payload =
            serde_json::to_string(&request.tables).context("Failed to serialize tables")?;
        let fanout_key = generate_idempotency_key(run_id, fan_out, &tables_payload);
        let fanout_start = Instant::now();

        store
            .append(&WorkflowEvent::new(
                run_id,
                Some(fan_out.to_string()),
                EventKind::StateStarted,
                fanout_key.clone(),
                format!(
                    "Creating {} tables in '{}'",
                    request.tables.len(),
                    run.central_database_name
                ),
                StateStatus::Running,
            ))
            .await?;

        match fanout::fan_out_tables(Arc::clone(&runner), &request).await {
            Ok(table_names) => {
                let duration_ms = fanout_start.elapsed().as_millis() as u64;
                store
                    .append(
                        &WorkflowEvent::new(
                            run_id,
                            Some(fan_out.to_string()),
                            EventKind::StateCompleted,
                            fanout_key,
                            format!("All {} tables created", table_names.len()),
                            StateStatus::Completed,
                        )
                        .with_duration(duration_ms)
                        .with_tables(table_names.clone()),
                    )
                    .await?;

                run.table_names = table_names;
                run.state_statuses
                    .insert(fan_out.to_string(), StateStatus::Completed);
            }
            Err(e) => {
                store
                    .append(
                        &WorkflowEvent::new(
                            run_id,
                            Some(fan_out.to_string()),
                            EventKind::StateFailed,
                            fanout_key,
                            format!("Table fan-out failed: {}", e),
                            StateStatus::Failed,
                        )
                        .with_error(e.to_string()),
                    )
                    .await?;

                return self.fail_run(&store, &mut run, fan_out, e).await;
            }
        }

        // Notify the producer account
        if cancel.is_cancelled() {
            return self
                .cancel_run(&store, &mut run, WorkflowState::PublishNotification.name())
                .await;
        }

        let publish = WorkflowState::PublishNotification.name();
        run.state_statuses
            .insert(publish.to_string(), StateStatus::Running);

        let notification = NotificationEvent::resource_links(
            request.producer_account_id.clone(),
            request.database_name.clone(),
            run.central_database_name.clone(),
            run.table_names.clone(),
        );
        let publish_key = generate_idempotency_key(run_id, publish, &notification.detail_type);

        store
            .append(&WorkflowEvent::new(
                run_id,
                Some(publish.to_string()),
                EventKind::StateStarted,
                publish_key.clone(),
                format!("Publishing '{}'", notification.detail_type),
                StateStatus::Running,
            ))
            .await?;

        match self.publisher.publish(notification).await {
            Ok(()) => {
                store
                    .append(&WorkflowEvent::new(
                        run_id,
                        Some(publish.to_string()),
                        EventKind::StateCompleted,
                        publish_key,
                        "Producer account notified".to_string(),
                        StateStatus::Completed,
                    ))
                    .await?;

                run.state_statuses
                    .insert(publish.to_string(), StateStatus::Completed);
            }
            Err(e) => {
                // Provisioning finished but the producer was not notified.
                // Re-submitting the same request re-publishes: the guarded
                // states absorb the already-provisioned resources.
                warn!(%run_id, "provisioning complete but notification undelivered");

                store
                    .append(
                        &WorkflowEvent::new(
                            run_id,
                            Some(publish.to_string()),
                            EventKind::StateFailed,
                            publish_key,
                            format!("Notification publish failed: {}", e),
                            StateStatus::Failed,
                        )
                        .with_error(e.to_string()),
                    )
                    .await?;

                return self.fail_run(&store, &mut run, publish, e.into()).await;
            }
        }

        self.complete_run(&store, &mut run).await
    }

    /// The transition table for the linear provisioning states: each
    /// entry is the state, its recovery guard, and the action it runs.
    /// Success or an absorbed already-exists failure both advance to the
    /// next entry.
    fn provisioning_steps(
        request: &WorkflowRequest,
    ) -> Vec<(WorkflowState, Option<RecoveryGuard>, Action)> {
        let location = request.data_product_location.clone();
        let central_database = request.central_database_name();

        vec![
            (
                WorkflowState::RegisterLocation,
                Some(RecoveryGuard::already_exists(ResourceKind::Location)),
                Action::RegisterLocation {
                    location: location.clone(),
                },
            ),
            (
                WorkflowState::GrantAdminAccess,
                None,
                Action::GrantLocationAccess {
                    principal: Principal::GovernanceAdmin,
                    location: location.clone(),
                },
            ),
            (
                WorkflowState::GrantProducerAccess,
                None,
                Action::GrantLocationAccess {
                    principal: Principal::Account(request.producer_account_id.clone()),
                    location,
                },
            ),
            (
                WorkflowState::CreateDatabase,
                Some(RecoveryGuard::already_exists(ResourceKind::Database)),
                Action::CreateDatabase {
                    database: central_database.clone(),
                },
            ),
            (
                WorkflowState::UpdateDatabaseMetadata,
                None,
                Action::UpdateDatabaseMetadata {
                    database: central_database,
                    owner: request.product_owner_name.clone(),
                    pii: request.product_pii_flag,
                },
            ),
        ]
    }

    /// Handle a run failure
    async fn fail_run(
        &self,
        store: &EventStore,
        run: &mut Run,
        state: &str,
        error: anyhow::Error,
    ) -> Result<Run> {
        let error_msg = error.to_string();
        error!(state, %error_msg, "Run failed");

        run.state = RunState::Failed {
            state: state.to_string(),
            error: error_msg.clone(),
        };
        run.completed_at = Some(Utc::now());
        run.state_statuses
            .insert(state.to_string(), StateStatus::Failed);

        let event = WorkflowEvent::new(
            run.id,
            Some(state.to_string()),
            EventKind::RunFailed,
            format!("{}:complete", run.id),
            format!("Run failed at '{}': {}", state, error_msg),
            StateStatus::Failed,
        )
        .with_error(error_msg);
        store.append(&event).await?;

        Ok(run.clone())
    }

    /// Handle cancellation between states
    async fn cancel_run(&self, store: &EventStore, run: &mut Run, state: &str) -> Result<Run> {
        info!(run_id = %run.id, state, "Run cancelled");

        run.state = RunState::Cancelled {
            state: state.to_string(),
        };
        run.completed_at = Some(Utc::now());

        let event = WorkflowEvent::new(
            run.id,
            Some(state.to_string()),
            EventKind::RunCancelled,
            format!("{}:cancel", run.id),
            format!("Run cancelled before '{}'", state),
            StateStatus::Pending,
        );
        store.append(&event).await?;

        Ok(run.clone())
    }

    /// Complete a successful run
    async fn complete_run(&self, store: &EventStore, run: &mut Run) -> Result<Run> {
        info!(run_id = %run.id, "Run completed successfully");

        run.state = RunState::Completed;
        run.completed_at = Some(Utc::now());

        let event = WorkflowEvent::new(
            run.id,
            None,
            EventKind::RunCompleted,
            format!("{}:complete", run.id),
            format!(
                "Registration of '{}' completed",
                run.central_database_name
            ),
            StateStatus::Completed,
        )
        .with_tables(run.table_names.clone());
        store.append(&event).await?;

        Ok(run.clone())
    }

    /// Get status of a run by ID
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<Run> {
        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let events = store.replay().await?;

        if events.is_empty() {
            anyhow::bail!("Run {} not found", run_id);
        }

        Run::from_events(&events).context("Failed to reconstruct run state")
    }

    /// List recent runs (most recent first)
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let run_ids = EventStore::list_runs_in(&self.runs_dir).await?;
        let mut runs = Vec::new();

        for run_id in run_ids {
            if let Ok(run) = self.get_run_status(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);

        Ok(runs)
    }
}
