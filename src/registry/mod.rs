//! Domain registry: the control plane connecting mesh accounts to the
//! central bus.
//!
//! Each producer/consumer domain registers once, before it can receive
//! notifications. Registration authorizes the domain's account on the
//! central bus and installs a routing rule that forwards events whose
//! `detail_type` equals `"{account_id}_createResourceLinks"` to the
//! domain's inbound endpoint. Routing is exact-string, which is safe
//! because account ids are globally unique; the registry enforces that
//! uniqueness instead of assuming it.
//!
//! The registry is shared read-mostly state: workflow runs only look up
//! routes. Registrations for different domains may happen concurrently,
//! so entries live in a per-key concurrent map rather than behind one
//! table-wide lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::domain::{resource_links_detail_type, NotificationEvent};

/// A domain's inbound event channel
pub type DomainEndpoint = mpsc::UnboundedSender<NotificationEvent>;

/// Create a paired endpoint and receiver for a domain's inbound events
pub fn domain_channel() -> (DomainEndpoint, mpsc::UnboundedReceiver<NotificationEvent>) {
    mpsc::unbounded_channel()
}

/// A registered producer/consumer domain
#[derive(Debug, Clone)]
pub struct DomainRegistration {
    /// Mesh-wide domain identifier
    pub domain_id: String,

    /// Account backing the domain
    pub account_id: String,

    /// Where the domain receives notification events
    pub endpoint: DomainEndpoint,

    /// When the registration was installed
    pub registered_at: DateTime<Utc>,
}

/// Registry of participating domains and their routing rules
#[derive(Debug, Default)]
pub struct DomainRegistry {
    /// domain_id -> registration
    domains: DashMap<String, DomainRegistration>,

    /// detail_type -> domain_id
    rules: DashMap<String, String>,
}

impl DomainRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain, or replace its registration (idempotent upsert).
    ///
    /// Installs the publish grant for `account_id` and the routing rule
    /// for its `detail_type`. Re-registering the same `domain_id` replaces
    /// the previous entry without leaving a duplicate rule behind.
    pub fn register(
        &self,
        domain_id: impl Into<String>,
        account_id: impl Into<String>,
        endpoint: DomainEndpoint,
    ) -> Result<(), RegistryError> {
        let domain_id = domain_id.into();
        let account_id = account_id.into();

        // Exact-string routing relies on account ids never being shared
        // across domains
        for entry in self.domains.iter() {
            if entry.account_id == account_id && entry.domain_id != domain_id {
                return Err(RegistryError::AccountAlreadyBound {
                    account_id,
                    domain_id: entry.domain_id.clone(),
                });
            }
        }

        let registration = DomainRegistration {
            domain_id: domain_id.clone(),
            account_id: account_id.clone(),
            endpoint,
            registered_at: Utc::now(),
        };

        if let Some(previous) = self.domains.insert(domain_id.clone(), registration) {
            if previous.account_id != account_id {
                self.rules
                    .remove(&resource_links_detail_type(&previous.account_id));
            }
        }
        self.rules
            .insert(resource_links_detail_type(&account_id), domain_id.clone());

        info!(%domain_id, %account_id, "domain registered");
        Ok(())
    }

    /// Remove a domain and its routing rule. Returns whether it existed.
    pub fn deregister(&self, domain_id: &str) -> bool {
        match self.domains.remove(domain_id) {
            Some((_, registration)) => {
                self.rules
                    .remove(&resource_links_detail_type(&registration.account_id));
                info!(%domain_id, "domain deregistered");
                true
            }
            None => false,
        }
    }

    /// Resolve a routing key to the registered endpoint, if any
    pub fn route(&self, detail_type: &str) -> Option<DomainEndpoint> {
        let domain_id = self.rules.get(detail_type)?.clone();
        self.domains.get(&domain_id).map(|r| r.endpoint.clone())
    }

    /// Whether `account_id` holds a publish grant on the central bus
    pub fn may_publish(&self, account_id: &str) -> bool {
        self.domains.iter().any(|r| r.account_id == account_id)
    }

    /// Look up a domain's registration
    pub fn registration(&self, domain_id: &str) -> Option<DomainRegistration> {
        self.domains.get(domain_id).map(|r| r.clone())
    }

    /// Number of registered domains
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Registration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The account is already backing another domain; exact-string routing
    /// would deliver that domain's events here too
    #[error("account {account_id} is already registered to domain '{domain_id}'")]
    AccountAlreadyBound {
        account_id: String,
        domain_id: String,
    },
}
