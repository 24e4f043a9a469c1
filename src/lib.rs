//! meshreg - workflow orchestrator for data mesh product registration
//!
//! A central governance plane registers a producer account's storage
//! location and catalog tables, then notifies the producer over an event
//! bus. The orchestrator is backend-agnostic: provisioning actions and
//! event delivery go through injected collaborator traits.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - Every workflow state transition is recorded as an immutable event
//! - Current run state is derived by replaying events
//! - Re-submitting a request is safe: guarded states absorb
//!   already-exists failures from earlier attempts
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits and in-memory implementations
//! - `core`: Orchestration logic (Orchestrator, EventStore, policies)
//! - `domain`: Data structures (WorkflowRequest, Run, events)
//! - `registry`: Domain registrations and event routing rules
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a registration request with domains registered on the bus
//! meshreg run request.yaml --domains domains.yaml
//!
//! # Check run status
//! meshreg status <run-id>
//!
//! # Validate a request file
//! meshreg validate request.yaml
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod registry;

// Re-export main types at crate root for convenience
pub use crate::adapters::{
    Action, ActionKind, EventPublisher, Principal, PublishError, ResourceKind, StepExecutor,
    StepFailure, StepOutput,
};
pub use crate::core::{CancelToken, Orchestrator, RecoveryGuard, RetryPolicy, WorkflowState};
pub use crate::domain::{
    EventKind, NotificationEvent, RequestError, Run, RunState, StateStatus, TableSpec,
    WorkflowEvent, WorkflowRequest,
};
pub use crate::registry::{DomainRegistration, DomainRegistry, RegistryError};
