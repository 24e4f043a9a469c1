//! Fan-out over the request's tables.
//!
//! Each table runs the create-table / grant-permissions sub-pipeline as
//! its own task; the sub-pipelines have no data dependency on each other
//! so they execute concurrently. The collected table-name sequence is
//! index-aligned with the request's `tables`, whatever order the tasks
//! finish in. One unguarded failure fails the whole stage; there is no
//! partial success.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::adapters::{Action, ResourceKind};
use crate::domain::{TableSpec, WorkflowRequest};

use super::policy::RecoveryGuard;
use super::step::StepRunner;

/// Run the per-table sub-pipeline for every table in the request and
/// collect the created table names in request order.
pub(crate) async fn fan_out_tables(
    runner: Arc<StepRunner>,
    request: &WorkflowRequest,
) -> Result<Vec<String>> {
    let central_database = request.central_database_name();

    let mut handles = Vec::with_capacity(request.tables.len());
    for table in request.tables.iter().cloned() {
        let runner = Arc::clone(&runner);
        let central_database = central_database.clone();
        let account_id = request.producer_account_id.clone();

        handles.push(tokio::spawn(async move {
            run_table_pipeline(&runner, &central_database, &account_id, &table).await?;
            Ok::<String, anyhow::Error>(table.name)
        }));
    }

    // Collect by input index so the result order never depends on
    // completion order
    let mut table_names = Vec::with_capacity(handles.len());
    let mut failure: Option<anyhow::Error> = None;

    for handle in handles {
        if failure.is_some() {
            handle.abort();
            continue;
        }

        match handle.await {
            Ok(Ok(name)) => table_names.push(name),
            Ok(Err(e)) => failure = Some(e),
            Err(e) => failure = Some(anyhow!("table sub-pipeline aborted: {}", e)),
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            debug!(tables = table_names.len(), "fan-out collected all tables");
            Ok(table_names)
        }
    }
}

/// The fixed sub-pipeline for one table: create it in the central
/// database, then grant the producer account permissions on it
async fn run_table_pipeline(
    runner: &StepRunner,
    central_database: &str,
    account_id: &str,
    table: &TableSpec,
) -> Result<()> {
    let create = Action::CreateTable {
        database: central_database.to_string(),
        table: table.name.clone(),
        location: table.location.clone(),
    };
    runner
        .run_step(
            &format!("create_table:{}", table.name),
            &create,
            Some(RecoveryGuard::already_exists(ResourceKind::Table)),
        )
        .await?;

    let grant = Action::GrantTablePermissions {
        database: central_database.to_string(),
        table: table.name.clone(),
        account_id: account_id.to_string(),
    };
    runner
        .run_step(
            &format!("grant_table_permissions:{}", table.name),
            &grant,
            None,
        )
        .await?;

    Ok(())
}
