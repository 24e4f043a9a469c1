//! Command-line interface for meshreg.
//!
//! Provides commands for running registration requests against the
//! in-memory backend, validating request files, and inspecting run logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use crate::adapters::{MemoryEventBus, MemoryProvisioner};
use crate::core::{EventStore, Orchestrator};
use crate::domain::{Run, RunState, StateStatus, WorkflowRequest};
use crate::registry::{domain_channel, DomainRegistry};

/// meshreg - workflow orchestrator for data mesh product registration
#[derive(Parser, Debug)]
#[command(name = "meshreg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a registration request against the in-memory backend
    Run {
        /// Request file (YAML or JSON)
        request: PathBuf,

        /// Domains file; each listed domain is registered on the bus
        /// before the run and its deliveries are printed afterwards
        #[arg(short, long)]
        domains: Option<PathBuf>,
    },

    /// Validate a request file without running it
    Validate {
        /// Request file (YAML or JSON)
        request: PathBuf,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Domains file schema: the accounts to register before a dry run
#[derive(Debug, Deserialize)]
struct DomainsFile {
    domains: Vec<DomainSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct DomainSpec {
    domain_id: String,
    account_id: String,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { request, domains } => run_request(&request, domains).await,
            Commands::Validate { request } => validate_request(&request),
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Run a registration request end to end against the in-memory backend
async fn run_request(request_path: &Path, domains_path: Option<PathBuf>) -> Result<()> {
    let request = WorkflowRequest::from_file(request_path)?;

    // Register listed domains so the completion event has somewhere to go
    let registry = Arc::new(DomainRegistry::new());
    let mut inboxes = Vec::new();

    if let Some(path) = domains_path {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read domains file: {}", path.display()))?;
        let file: DomainsFile =
            serde_yaml::from_str(&content).context("Failed to parse domains file")?;

        for domain in file.domains {
            let (endpoint, receiver) = domain_channel();
            registry.register(domain.domain_id.clone(), domain.account_id.clone(), endpoint)?;
            inboxes.push((domain.domain_id, receiver));
        }
    }

    let provisioner = Arc::new(MemoryProvisioner::new());
    let bus = Arc::new(MemoryEventBus::new(Arc::clone(&registry)));
    let orchestrator = Orchestrator::new(provisioner, bus)?;

    let run = orchestrator.run(request).await?;

    match &run.state {
        RunState::Completed => {
            println!("Run {} completed", run.id);
            println!("Central database: {}", run.central_database_name);
            println!("Tables: {}", run.table_names.join(", "));

            for (domain_id, mut receiver) in inboxes {
                while let Ok(event) = receiver.try_recv() {
                    println!("\nDelivered to '{}' ({})", domain_id, event.detail_type);
                    println!("{}", serde_json::to_string_pretty(&event.detail)?);
                }
            }
        }
        RunState::Failed { state, error } => {
            eprintln!("[Run {} failed at '{}': {}]", run.id, state, error);
            std::process::exit(1);
        }
        RunState::Cancelled { state } => {
            eprintln!("[Run {} cancelled before '{}']", run.id, state);
            std::process::exit(1);
        }
        RunState::Running => {
            eprintln!("[Run {} still running]", run.id);
        }
    }

    Ok(())
}

/// Validate a request file without side effects
fn validate_request(request_path: &Path) -> Result<()> {
    let request = WorkflowRequest::from_file(request_path)?;
    request.validate()?;

    println!("Request OK");
    println!("  Producer account: {}", request.producer_account_id);
    println!("  Central database: {}", request.central_database_name());
    println!("  Tables: {}", request.tables.len());
    for table in &request.tables {
        println!("    {} ({})", table.name, table.location);
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let store = EventStore::open(run_id).await?;
    let events = store.replay().await?;
    if events.is_empty() {
        anyhow::bail!("Run {} not found", run_id);
    }

    let run = Run::from_events(&events).context("Failed to reconstruct run state")?;

    println!("Run ID: {}", run.id);
    println!("Producer account: {}", run.producer_account_id);
    println!("Central database: {}", run.central_database_name);
    println!("State: {:?}", run.state);
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if !run.table_names.is_empty() {
        println!("Tables: {}", run.table_names.join(", "));
    }

    println!("\nState statuses:");
    let mut states: Vec<(&String, &StateStatus)> = run.state_statuses.iter().collect();
    states.sort_by(|a, b| a.0.cmp(b.0));
    for (state, status) in states {
        println!("  {}: {:?}", state, status);
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let mut runs = Vec::new();
    for run_id in EventStore::list_runs().await? {
        let store = EventStore::open(run_id).await?;
        let events = store.replay().await?;
        if let Some(run) = Run::from_events(&events) {
            runs.push(run);
        }
    }

    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<28} {:<12}", "RUN ID", "CENTRAL DATABASE", "STATE");
    println!("{}", "-".repeat(80));

    for run in runs {
        let state_str = match &run.state {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed { .. } => "failed",
            RunState::Cancelled { .. } => "cancelled",
        };
        println!(
            "{:<38} {:<28} {:<12}",
            run.id, run.central_database_name, state_str
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let config = crate::config::config()?;

    println!("Home: {}", config.home.display());
    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found)"),
    }
    println!(
        "Step timeout: {}s",
        config.execution.step_timeout_seconds
    );
    println!(
        "Retry: {} attempts, {}ms initial delay, x{} backoff",
        config.execution.retry.max_attempts,
        config.execution.retry.initial_delay_ms,
        config.execution.retry.backoff_multiplier
    );

    Ok(())
}
