//! Run state and reconstruction from events.
//!
//! A Run represents a single execution of the registration workflow.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{EventKind, StateStatus, WorkflowEvent};
use super::request::WorkflowRequest;

/// A registration workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Account that submitted the registration
    pub producer_account_id: String,

    /// Database name local to the producer account
    pub database_name: String,

    /// Database name in the central catalog
    pub central_database_name: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Status of each workflow state (state name -> status)
    pub state_statuses: HashMap<String, StateStatus>,

    /// Created table names, in request order (the workflow result)
    pub table_names: Vec<String>,
}

impl Run {
    /// Create a new run for a registration request
    pub fn new(id: Uuid, request: &WorkflowRequest) -> Self {
        Self {
            id,
            producer_account_id: request.producer_account_id.clone(),
            database_name: request.database_name.clone(),
            central_database_name: request.central_database_name(),
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            state_statuses: HashMap::new(),
            table_names: Vec::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[WorkflowEvent]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self {
            id: first_event.run_id,
            producer_account_id: String::new(),
            database_name: String::new(),
            central_database_name: String::new(),
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            state_statuses: HashMap::new(),
            table_names: Vec::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &WorkflowEvent) {
        if let Some(ref tables) = event.tables {
            self.table_names = tables.clone();
        }

        match event.kind {
            EventKind::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                if let Some(ref context) = event.context {
                    self.producer_account_id = context.producer_account_id.clone();
                    self.database_name = context.database_name.clone();
                    self.central_database_name = context.central_database_name.clone();
                }
            }
            EventKind::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventKind::RunFailed => {
                self.state = RunState::Failed {
                    state: event.state.clone().unwrap_or_default(),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventKind::RunCancelled => {
                self.state = RunState::Cancelled {
                    state: event.state.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventKind::StateStarted | EventKind::StateRetrying => {
                if let Some(ref state) = event.state {
                    self.state_statuses
                        .insert(state.clone(), StateStatus::Running);
                }
            }
            EventKind::StateCompleted => {
                if let Some(ref state) = event.state {
                    self.state_statuses
                        .insert(state.clone(), StateStatus::Completed);
                }
            }
            EventKind::StateRecovered => {
                if let Some(ref state) = event.state {
                    self.state_statuses
                        .insert(state.clone(), StateStatus::Recovered);
                }
            }
            EventKind::StateFailed => {
                if let Some(ref state) = event.state {
                    self.state_statuses.insert(state.clone(), StateStatus::Failed);
                }
            }
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Check if the run has finished (successfully or not)
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Check if a workflow state completed, either normally or by skipping
    /// past an already-provisioned resource
    pub fn is_state_completed(&self, state: &str) -> bool {
        matches!(
            self.state_statuses.get(state),
            Some(StateStatus::Completed) | Some(StateStatus::Recovered)
        )
    }
}

/// State of a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// Completed successfully; the producer account has been notified
    Completed,

    /// Failed at a workflow state
    Failed { state: String, error: String },

    /// Cancelled before the named state started
    Cancelled { state: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::RunContext;
    use crate::domain::request::TableSpec;

    fn test_request() -> WorkflowRequest {
        WorkflowRequest {
            data_product_location: "bucket/path".to_string(),
            producer_account_id: "111111111111".to_string(),
            database_name: "sales".to_string(),
            tables: vec![TableSpec {
                name: "orders".to_string(),
                location: "bucket/path/orders".to_string(),
            }],
            product_owner_name: "Alice".to_string(),
            product_pii_flag: false,
        }
    }

    #[test]
    fn test_run_creation() {
        let run_id = Uuid::new_v4();
        let run = Run::new(run_id, &test_request());

        assert_eq!(run.id, run_id);
        assert_eq!(run.central_database_name, "111111111111_sales");
        assert!(run.is_running());
    }

    #[test]
    fn test_run_from_events() {
        let run_id = Uuid::new_v4();

        let events = vec![
            WorkflowEvent::new(
                run_id,
                None,
                EventKind::RunStarted,
                format!("{}:start", run_id),
                "Run started".to_string(),
                StateStatus::Running,
            )
            .with_context(RunContext {
                producer_account_id: "111111111111".to_string(),
                database_name: "sales".to_string(),
                central_database_name: "111111111111_sales".to_string(),
            }),
            WorkflowEvent::new(
                run_id,
                Some("register_location".to_string()),
                EventKind::StateStarted,
                format!("{}:register_location:abc", run_id),
                "State started".to_string(),
                StateStatus::Running,
            ),
            WorkflowEvent::new(
                run_id,
                Some("register_location".to_string()),
                EventKind::StateCompleted,
                format!("{}:register_location:abc", run_id),
                "State completed".to_string(),
                StateStatus::Completed,
            ),
            WorkflowEvent::new(
                run_id,
                Some("fan_out_tables".to_string()),
                EventKind::StateCompleted,
                format!("{}:fan_out_tables:def", run_id),
                "Fan-out completed".to_string(),
                StateStatus::Completed,
            )
            .with_tables(vec!["orders".to_string()]),
            WorkflowEvent::new(
                run_id,
                None,
                EventKind::RunCompleted,
                format!("{}:complete", run_id),
                "Run completed".to_string(),
                StateStatus::Completed,
            ),
        ];

        let run = Run::from_events(&events).unwrap();

        assert_eq!(run.id, run_id);
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.producer_account_id, "111111111111");
        assert_eq!(run.central_database_name, "111111111111_sales");
        assert!(run.is_state_completed("register_location"));
        assert_eq!(run.table_names, vec!["orders"]);
    }

    #[test]
    fn test_recovered_state_counts_as_completed() {
        let run_id = Uuid::new_v4();
        let mut run = Run::new(run_id, &test_request());

        run.apply_event(
            &WorkflowEvent::new(
                run_id,
                Some("create_database".to_string()),
                EventKind::StateRecovered,
                format!("{}:create_database:abc", run_id),
                "Database already provisioned".to_string(),
                StateStatus::Recovered,
            )
            .with_error("database already exists".to_string()),
        );

        assert!(run.is_state_completed("create_database"));
    }

    #[test]
    fn test_failed_run_carries_state_name() {
        let run_id = Uuid::new_v4();
        let mut run = Run::new(run_id, &test_request());

        run.apply_event(
            &WorkflowEvent::new(
                run_id,
                Some("grant_producer_access".to_string()),
                EventKind::RunFailed,
                format!("{}:complete", run_id),
                "Run failed".to_string(),
                StateStatus::Failed,
            )
            .with_error("access denied".to_string()),
        );

        assert_eq!(
            run.state,
            RunState::Failed {
                state: "grant_producer_access".to_string(),
                error: "access denied".to_string(),
            }
        );
        assert!(run.is_finished());
    }
}
