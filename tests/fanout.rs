//! Fan-Out Integration Tests
//!
//! The per-table sub-pipelines run concurrently, but the collected table
//! names must follow request order, and one unguarded failure must fail
//! the whole stage.

use std::sync::Arc;

use tempfile::TempDir;

use meshreg::adapters::{ActionKind, MemoryEventBus, MemoryProvisioner};
use meshreg::config::ExecutionSettings;
use meshreg::core::{EventStore, Orchestrator, RetryPolicy};
use meshreg::domain::{EventKind, RunState, TableSpec, WorkflowRequest};
use meshreg::registry::{domain_channel, DomainRegistry};

fn fast_settings() -> ExecutionSettings {
    ExecutionSettings {
        step_timeout_seconds: 5,
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
        },
    }
}

fn request_with_tables(tables: Vec<TableSpec>) -> WorkflowRequest {
    WorkflowRequest {
        data_product_location: "bucket/path".to_string(),
        producer_account_id: "111111111111".to_string(),
        database_name: "sales".to_string(),
        tables,
        product_owner_name: "Alice".to_string(),
        product_pii_flag: false,
    }
}

fn table(name: &str) -> TableSpec {
    TableSpec {
        name: name.to_string(),
        location: format!("bucket/path/{}", name),
    }
}

fn orchestrator(
    provisioner: Arc<MemoryProvisioner>,
    registry: Arc<DomainRegistry>,
    runs_dir: &TempDir,
) -> Orchestrator {
    Orchestrator::with_settings(
        provisioner,
        Arc::new(MemoryEventBus::new(registry)),
        fast_settings(),
        runs_dir.path().to_path_buf(),
    )
}

#[tokio::test]
async fn test_result_order_follows_request_order() {
    let temp = TempDir::new().unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let registry = Arc::new(DomainRegistry::new());

    // t2 is listed first but finishes last
    provisioner.delay_create_table("t2", 150);

    let orchestrator = orchestrator(Arc::clone(&provisioner), registry, &temp);
    let run = orchestrator
        .run(request_with_tables(vec![table("t2"), table("t1")]))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.table_names, vec!["t2", "t1"]);

    // The log shows t1 actually completed first
    let store = EventStore::open_in(temp.path(), run.id).await.unwrap();
    let events = store.replay().await.unwrap();
    let completion_order: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == EventKind::StateCompleted)
        .filter_map(|e| e.state.as_deref())
        .filter(|s| s.starts_with("create_table:"))
        .collect();
    assert_eq!(completion_order, vec!["create_table:t1", "create_table:t2"]);
}

#[tokio::test]
async fn test_existing_table_still_gets_permissions() {
    let temp = TempDir::new().unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let registry = Arc::new(DomainRegistry::new());

    provisioner.seed_database("111111111111_sales");
    provisioner.seed_table("111111111111_sales", "orders");

    let orchestrator = orchestrator(Arc::clone(&provisioner), registry, &temp);
    let run = orchestrator
        .run(request_with_tables(vec![table("orders"), table("refunds")]))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.table_names, vec!["orders", "refunds"]);

    // The pre-existing table was recovered past, then granted anyway
    let store = EventStore::open_in(temp.path(), run.id).await.unwrap();
    let events = store.replay().await.unwrap();
    assert!(events.iter().any(|e| {
        e.kind == EventKind::StateRecovered && e.state.as_deref() == Some("create_table:orders")
    }));
    assert!(provisioner.has_table_grant("111111111111", "111111111111_sales", "orders"));
    assert!(provisioner.has_table_grant("111111111111", "111111111111_sales", "refunds"));
}

#[tokio::test]
async fn test_one_failing_table_fails_the_stage() {
    let temp = TempDir::new().unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let registry = Arc::new(DomainRegistry::new());

    let (endpoint, mut inbox) = domain_channel();
    registry
        .register("sales-domain", "111111111111", endpoint)
        .unwrap();

    provisioner.deny(ActionKind::GrantTablePermissions);

    let orchestrator = orchestrator(Arc::clone(&provisioner), registry, &temp);
    let run = orchestrator
        .run(request_with_tables(vec![table("orders"), table("refunds")]))
        .await
        .unwrap();

    // No partial success: the stage fails as a whole and nothing is
    // published
    match &run.state {
        RunState::Failed { state, .. } => assert_eq!(state, "fan_out_tables"),
        other => panic!("expected failed run, got {:?}", other),
    }
    assert!(run.table_names.is_empty());
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_every_table_is_created_and_granted() {
    let temp = TempDir::new().unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let registry = Arc::new(DomainRegistry::new());

    let tables = vec![table("orders"), table("refunds"), table("shipments")];

    let orchestrator = orchestrator(Arc::clone(&provisioner), registry, &temp);
    let run = orchestrator
        .run(request_with_tables(tables))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.table_names, vec!["orders", "refunds", "shipments"]);

    for name in ["orders", "refunds", "shipments"] {
        assert!(provisioner.has_table("111111111111_sales", name));
        assert!(provisioner.has_table_grant("111111111111", "111111111111_sales", name));
    }
}
