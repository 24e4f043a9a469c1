//! Event types for the event-sourced orchestrator.
//!
//! Every workflow state transition is recorded as an immutable event in an
//! append-only log. The current state of any run can be reconstructed by
//! replaying its events in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Workflow state name (if applicable); fan-out items append the table
    /// name, e.g. "create_table:orders"
    pub state: Option<String>,

    /// Type of event
    pub kind: EventKind,

    /// Idempotency key format: "{run_id}:{state}:{action_hash}"
    pub idempotency_key: String,

    /// Human-readable summary
    pub summary: String,

    /// Current status of the state/run
    pub status: StateStatus,

    /// Time taken in milliseconds (for finished steps)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed or recovered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Request context, carried on the run-started event so a run can be
    /// reconstructed from its log alone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RunContext>,

    /// Created table names in request order, carried on the fan-out
    /// completion event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,
}

impl WorkflowEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        state: Option<String>,
        kind: EventKind,
        idempotency_key: String,
        summary: String,
        status: StateStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            state,
            kind,
            idempotency_key,
            summary,
            status,
            duration_ms: None,
            error: None,
            context: None,
            tables: None,
        }
    }

    /// Attach duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach request context
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach the ordered table-name result
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = Some(tables);
        self
    }
}

/// Request fields needed to reconstruct a run from its event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub producer_account_id: String,
    pub database_name: String,
    pub central_database_name: String,
}

/// Types of events that can occur during workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new run has started
    RunStarted,

    /// A run completed successfully
    RunCompleted,

    /// A run failed
    RunFailed,

    /// A run was cancelled between states
    RunCancelled,

    /// A workflow state has started execution
    StateStarted,

    /// A workflow state completed successfully
    StateCompleted,

    /// A state's action found its resource already provisioned and control
    /// moved on to the next state
    StateRecovered,

    /// A state is being retried after a transient failure
    StateRetrying,

    /// A workflow state failed
    StateFailed,
}

/// Status of a workflow state or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Skipped past an already-provisioned resource
    Recovered,

    /// Failed (with error)
    Failed,
}

impl Default for StateStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = WorkflowEvent::new(
            Uuid::new_v4(),
            Some("register_location".to_string()),
            EventKind::StateStarted,
            "test-key".to_string(),
            "Registering location".to_string(),
            StateStatus::Running,
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind, EventKind::StateStarted);
        assert_eq!(parsed.status, StateStatus::Running);
        assert!(parsed.tables.is_none());
    }

    #[test]
    fn test_event_with_tables() {
        let event = WorkflowEvent::new(
            Uuid::new_v4(),
            Some("fan_out_tables".to_string()),
            EventKind::StateCompleted,
            "test-key".to_string(),
            "Fan-out completed".to_string(),
            StateStatus::Completed,
        )
        .with_tables(vec!["orders".to_string(), "refunds".to_string()])
        .with_duration(42);

        assert_eq!(event.duration_ms, Some(42));
        assert_eq!(
            event.tables,
            Some(vec!["orders".to_string(), "refunds".to_string()])
        );
    }

    #[test]
    fn test_event_with_error() {
        let event = WorkflowEvent::new(
            Uuid::new_v4(),
            Some("create_database".to_string()),
            EventKind::StateRecovered,
            "test-key".to_string(),
            "Database already provisioned".to_string(),
            StateStatus::Recovered,
        )
        .with_error("database '111111111111_sales' already exists".to_string());

        assert!(event.error.unwrap().contains("already exists"));
    }
}
