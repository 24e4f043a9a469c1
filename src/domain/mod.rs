//! Domain types for the registration workflow.
//!
//! This module contains the core data structures:
//! - Request: inbound registration requests and their validation
//! - Events: immutable records of workflow state transitions
//! - Run: workflow execution state
//! - Notification: the completion event published to producer accounts

pub mod events;
pub mod notification;
pub mod request;
pub mod run;

// Re-export commonly used types
pub use events::{EventKind, RunContext, StateStatus, WorkflowEvent};
pub use notification::{
    resource_links_detail_type, NotificationEvent, NotificationPayload, EVENT_SOURCE,
};
pub use request::{RequestError, TableSpec, WorkflowRequest};
pub use run::{Run, RunState};
