//! Collaborator interfaces for provisioning backends and event delivery.
//!
//! The orchestrator never talks to a catalog or a bus directly: it drives
//! a [`StepExecutor`] for provisioning actions and an [`EventPublisher`]
//! for the completion notification. In-memory implementations back the
//! CLI's dry-run mode and the test suite.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::NotificationEvent;

// Re-export the in-memory collaborators
pub use memory::{MemoryEventBus, MemoryProvisioner};

/// Principal receiving a permission grant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// The central governance admin role
    GovernanceAdmin,

    /// An external account participating in the mesh
    Account(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GovernanceAdmin => write!(f, "governance-admin"),
            Self::Account(id) => write!(f, "account:{}", id),
        }
    }
}

/// One provisioning action against the external backend.
///
/// Each action targets exactly one operation and is safe to re-attempt:
/// creations surface [`StepFailure::AlreadyExists`] on repeats, grants and
/// metadata updates are idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Action {
    /// Register a storage location with the central catalog
    RegisterLocation { location: String },

    /// Grant a principal access to a registered location
    GrantLocationAccess {
        principal: Principal,
        location: String,
    },

    /// Create a database in the central catalog
    CreateDatabase { database: String },

    /// Record owner and PII metadata on a database
    UpdateDatabaseMetadata {
        database: String,
        owner: String,
        pii: bool,
    },

    /// Create a table under a central database
    CreateTable {
        database: String,
        table: String,
        location: String,
    },

    /// Grant an account permissions on a table
    GrantTablePermissions {
        database: String,
        table: String,
        account_id: String,
    },
}

impl Action {
    /// The action's kind, independent of its parameters
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::RegisterLocation { .. } => ActionKind::RegisterLocation,
            Self::GrantLocationAccess { .. } => ActionKind::GrantLocationAccess,
            Self::CreateDatabase { .. } => ActionKind::CreateDatabase,
            Self::UpdateDatabaseMetadata { .. } => ActionKind::UpdateDatabaseMetadata,
            Self::CreateTable { .. } => ActionKind::CreateTable,
            Self::GrantTablePermissions { .. } => ActionKind::GrantTablePermissions,
        }
    }
}

/// Kinds of provisioning actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RegisterLocation,
    GrantLocationAccess,
    CreateDatabase,
    UpdateDatabaseMetadata,
    CreateTable,
    GrantTablePermissions,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegisterLocation => "register_location",
            Self::GrantLocationAccess => "grant_location_access",
            Self::CreateDatabase => "create_database",
            Self::UpdateDatabaseMetadata => "update_database_metadata",
            Self::CreateTable => "create_table",
            Self::GrantTablePermissions => "grant_table_permissions",
        };
        write!(f, "{}", name)
    }
}

/// Kinds of provisioned resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Location,
    Database,
    Table,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Location => "location",
            Self::Database => "database",
            Self::Table => "table",
        };
        write!(f, "{}", name)
    }
}

/// Output of a successful provisioning action
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Identifier of the affected resource
    pub resource: String,
}

impl StepOutput {
    /// Create an output naming the affected resource
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

/// Failures a provisioning action can surface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    /// The resource was provisioned by an earlier run; recoverable at the
    /// workflow's guarded states, fatal elsewhere
    #[error("{resource} '{name}' already exists")]
    AlreadyExists { resource: ResourceKind, name: String },

    /// The backend refused the action; fatal
    #[error("{action} denied: {message}")]
    AccessDenied { action: ActionKind, message: String },

    /// Throttling, timeouts, or other short-lived backend trouble;
    /// retryable with bounded backoff
    #[error("{action} failed transiently: {message}")]
    Transient { action: ActionKind, message: String },
}

impl StepFailure {
    /// Whether retrying the same action may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Trait for provisioning backends
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Execute a single provisioning action.
    ///
    /// The executor keeps no per-call state and never retries on its own;
    /// retry policy lives with the caller.
    async fn execute(&self, action: &Action) -> Result<StepOutput, StepFailure>;
}

/// Trait for event bus publication
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to the bus. Single attempt, fire-and-forget from
    /// the workflow's perspective.
    async fn publish(&self, event: NotificationEvent) -> Result<(), PublishError>;
}

/// Failures surfaced by event publication
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The bus refused the event
    #[error("event bus rejected '{detail_type}': {message}")]
    Rejected {
        detail_type: String,
        message: String,
    },

    /// The matched endpoint is no longer receiving
    #[error("endpoint for '{detail_type}' is closed")]
    EndpointClosed { detail_type: String },
}
