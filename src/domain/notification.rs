//! Notification events published when a registration completes.
//!
//! The producer account learns that its tables are available in the
//! central catalog through a single event on the mesh bus. Routing is by
//! exact match on `detail_type`, which embeds the account id, so an event
//! can never reach another domain as long as account ids stay globally
//! unique (the registry enforces this).

use serde::{Deserialize, Serialize};

/// Source marker carried by every event this workflow publishes
pub const EVENT_SOURCE: &str = "mesh.central.registration";

/// Routing key for resource-link creation events addressed to `account_id`
pub fn resource_links_detail_type(account_id: &str) -> String {
    format!("{}_createResourceLinks", account_id)
}

/// Event delivered to a producer account after its data product has been
/// registered in the central catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Originating workflow marker ([`EVENT_SOURCE`])
    pub source: String,

    /// Account-scoped routing key
    pub detail_type: String,

    /// Event payload
    pub detail: NotificationPayload,
}

/// Payload of a [`NotificationEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Database name in the central catalog
    pub central_database_name: String,

    /// Account the event is addressed to
    pub producer_account_id: String,

    /// Database name local to the producer account
    pub database_name: String,

    /// Created table names, in request order
    pub table_names: Vec<String>,
}

impl NotificationEvent {
    /// Build the completion event for a registered data product
    pub fn resource_links(
        producer_account_id: impl Into<String>,
        database_name: impl Into<String>,
        central_database_name: impl Into<String>,
        table_names: Vec<String>,
    ) -> Self {
        let producer_account_id = producer_account_id.into();

        Self {
            source: EVENT_SOURCE.to_string(),
            detail_type: resource_links_detail_type(&producer_account_id),
            detail: NotificationPayload {
                central_database_name: central_database_name.into(),
                producer_account_id,
                database_name: database_name.into(),
                table_names,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_type_is_account_scoped() {
        let event = NotificationEvent::resource_links(
            "111111111111",
            "sales",
            "111111111111_sales",
            vec!["orders".to_string()],
        );

        assert_eq!(event.source, EVENT_SOURCE);
        assert_eq!(event.detail_type, "111111111111_createResourceLinks");
        assert_eq!(event.detail.table_names, vec!["orders"]);
    }

    #[test]
    fn test_payload_wire_format() {
        let event = NotificationEvent::resource_links(
            "111111111111",
            "sales",
            "111111111111_sales",
            vec!["orders".to_string(), "refunds".to_string()],
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["detailType"], "111111111111_createResourceLinks");
        assert_eq!(json["detail"]["centralDatabaseName"], "111111111111_sales");
        assert_eq!(json["detail"]["producerAccountId"], "111111111111");
        assert_eq!(json["detail"]["databaseName"], "sales");
        assert_eq!(json["detail"]["tableNames"][1], "refunds");
    }

    #[test]
    fn test_roundtrip() {
        let event = NotificationEvent::resource_links(
            "222222222222",
            "hr",
            "222222222222_hr",
            vec!["people".to_string()],
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: NotificationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
