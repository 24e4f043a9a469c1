//! In-memory collaborators.
//!
//! `MemoryProvisioner` mimics a provisioning backend: creations remember
//! what exists and surface already-exists failures on repeats, grants are
//! idempotent. Failure injection hooks let tests and dry runs exercise
//! the workflow's recovery and abort paths. `MemoryEventBus` delivers
//! notifications through the domain registry's routing rules.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::warn;

use crate::domain::NotificationEvent;
use crate::registry::DomainRegistry;

use super::{
    Action, ActionKind, EventPublisher, Principal, PublishError, ResourceKind, StepExecutor,
    StepFailure, StepOutput,
};

/// In-memory provisioning backend
#[derive(Debug, Default)]
pub struct MemoryProvisioner {
    locations: DashSet<String>,
    databases: DashSet<String>,
    metadata: DashMap<String, (String, bool)>,
    tables: DashSet<(String, String)>,
    grants: DashSet<String>,

    // Failure/latency injection
    denied: DashSet<ActionKind>,
    denied_grants: DashSet<Principal>,
    transient: DashMap<ActionKind, u32>,
    create_table_delays: DashMap<String, u64>,
}

impl MemoryProvisioner {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a location as provisioned by an earlier run
    pub fn seed_location(&self, location: impl Into<String>) {
        self.locations.insert(location.into());
    }

    /// Mark a database as provisioned by an earlier run
    pub fn seed_database(&self, database: impl Into<String>) {
        self.databases.insert(database.into());
    }

    /// Mark a table as provisioned by an earlier run
    pub fn seed_table(&self, database: impl Into<String>, table: impl Into<String>) {
        self.tables.insert((database.into(), table.into()));
    }

    /// Refuse all actions of the given kind with an access failure
    pub fn deny(&self, kind: ActionKind) {
        self.denied.insert(kind);
    }

    /// Refuse location grants for one principal, leaving other grants
    /// working
    pub fn deny_location_grant(&self, principal: Principal) {
        self.denied_grants.insert(principal);
    }

    /// Fail the next `times` actions of the given kind transiently
    pub fn fail_transient(&self, kind: ActionKind, times: u32) {
        self.transient.insert(kind, times);
    }

    /// Delay table creation for the named table
    pub fn delay_create_table(&self, table: impl Into<String>, delay_ms: u64) {
        self.create_table_delays.insert(table.into(), delay_ms);
    }

    pub fn has_location(&self, location: &str) -> bool {
        self.locations.contains(location)
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.databases.contains(database)
    }

    pub fn has_table(&self, database: &str, table: &str) -> bool {
        self.tables
            .contains(&(database.to_string(), table.to_string()))
    }

    /// Owner recorded for a database, if metadata was written
    pub fn database_owner(&self, database: &str) -> Option<String> {
        self.metadata.get(database).map(|m| m.0.clone())
    }

    pub fn has_location_grant(&self, principal: &Principal, location: &str) -> bool {
        self.grants
            .contains(&format!("location:{}:{}", principal, location))
    }

    pub fn has_table_grant(&self, account_id: &str, database: &str, table: &str) -> bool {
        self.grants
            .contains(&format!("table:{}:{}.{}", account_id, database, table))
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    fn injected_failure(&self, kind: ActionKind) -> Option<StepFailure> {
        if self.denied.contains(&kind) {
            return Some(StepFailure::AccessDenied {
                action: kind,
                message: "denied by backend policy".to_string(),
            });
        }

        if let Some(mut remaining) = self.transient.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(StepFailure::Transient {
                    action: kind,
                    message: "injected transient failure".to_string(),
                });
            }
        }

        None
    }
}

#[async_trait]
impl StepExecutor for MemoryProvisioner {
    fn name(&self) -> &str {
        "memory"
    }

    async fn execute(&self, action: &Action) -> Result<StepOutput, StepFailure> {
        if let Some(failure) = self.injected_failure(action.kind()) {
            return Err(failure);
        }

        match action {
            Action::RegisterLocation { location } => {
                if !self.locations.insert(location.clone()) {
                    return Err(StepFailure::AlreadyExists {
                        resource: ResourceKind::Location,
                        name: location.clone(),
                    });
                }
                Ok(StepOutput::new(location.clone()))
            }

            Action::GrantLocationAccess {
                principal,
                location,
            } => {
                if self.denied_grants.contains(principal) {
                    return Err(StepFailure::AccessDenied {
                        action: action.kind(),
                        message: format!("grant to {} denied", principal),
                    });
                }

                self.grants
                    .insert(format!("location:{}:{}", principal, location));
                Ok(StepOutput::new(location.clone()))
            }

            Action::CreateDatabase { database } => {
                if !self.databases.insert(database.clone()) {
                    return Err(StepFailure::AlreadyExists {
                        resource: ResourceKind::Database,
                        name: database.clone(),
                    });
                }
                Ok(StepOutput::new(database.clone()))
            }

            Action::UpdateDatabaseMetadata {
                database,
                owner,
                pii,
            } => {
                self.metadata
                    .insert(database.clone(), (owner.clone(), *pii));
                Ok(StepOutput::new(database.clone()))
            }

            Action::CreateTable {
                database, table, ..
            } => {
                if let Some(delay_ms) = self.create_table_delays.get(table).map(|d| *d) {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }

                if !self.tables.insert((database.clone(), table.clone())) {
                    return Err(StepFailure::AlreadyExists {
                        resource: ResourceKind::Table,
                        name: table.clone(),
                    });
                }
                Ok(StepOutput::new(table.clone()))
            }

            Action::GrantTablePermissions {
                database,
                table,
                account_id,
            } => {
                self.grants
                    .insert(format!("table:{}:{}.{}", account_id, database, table));
                Ok(StepOutput::new(table.clone()))
            }
        }
    }
}

/// In-memory event bus routing through a [`DomainRegistry`]
#[derive(Debug)]
pub struct MemoryEventBus {
    registry: Arc<DomainRegistry>,
}

impl MemoryEventBus {
    /// Create a bus backed by the given registry
    pub fn new(registry: Arc<DomainRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: NotificationEvent) -> Result<(), PublishError> {
        let detail_type = event.detail_type.clone();

        match self.registry.route(&detail_type) {
            Some(endpoint) => endpoint
                .send(event)
                .map_err(|_| PublishError::EndpointClosed { detail_type }),
            None => {
                // Bus semantics: an event matching no rule is accepted and
                // dropped, not an error
                warn!(%detail_type, "no routing rule matched; event dropped");
                Ok(())
            }
        }
    }
}
