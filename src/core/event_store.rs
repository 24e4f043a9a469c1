//! Append-only run log with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection. Each run gets its own directory under
//! the runs root.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::WorkflowEvent;

/// File-based event store using JSONL format
#[derive(Debug)]
pub struct EventStore {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl EventStore {
    /// Create or open the event store for a run, under the configured
    /// runs directory
    pub async fn open(run_id: Uuid) -> Result<Self> {
        let base_dir = crate::config::runs_dir()?;
        Self::open_in(&base_dir, run_id).await
    }

    /// Create or open the event store for a run under an explicit base
    /// directory
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &WorkflowEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<WorkflowEvent>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: WorkflowEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// List all run IDs under the configured runs directory
    pub async fn list_runs() -> Result<Vec<Uuid>> {
        let base_dir = crate::config::runs_dir()?;
        Self::list_runs_in(&base_dir).await
    }

    /// List all run IDs under an explicit base directory
    pub async fn list_runs_in(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Generate an idempotency key for a workflow state
pub fn generate_idempotency_key(run_id: Uuid, state: &str, payload: &str) -> String {
    let payload_hash = hash_payload(payload);
    format!("{}:{}:{}", run_id, state, payload_hash)
}

/// Hash an action payload (first 16 hex chars of SHA256)
pub fn hash_payload(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, StateStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let temp_dir = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = EventStore::open_in(temp_dir.path(), run_id).await.unwrap();

        let event1 = WorkflowEvent::new(
            run_id,
            None,
            EventKind::RunStarted,
            format!("{}:start", run_id),
            "Run started".to_string(),
            StateStatus::Running,
        );

        let event2 = WorkflowEvent::new(
            run_id,
            Some("register_location".to_string()),
            EventKind::StateStarted,
            format!("{}:register_location:abc", run_id),
            "State started".to_string(),
            StateStatus::Running,
        );

        store.append(&event1).await.unwrap();
        store.append(&event2).await.unwrap();

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::RunStarted);
        assert_eq!(events[1].kind, EventKind::StateStarted);
    }

    #[tokio::test]
    async fn test_event_replay_order() {
        let temp_dir = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = EventStore::open_in(temp_dir.path(), run_id).await.unwrap();

        for i in 0..5 {
            let event = WorkflowEvent::new(
                run_id,
                Some(format!("state{}", i)),
                EventKind::StateStarted,
                format!("{}:state{}:abc", run_id, i),
                format!("State {} started", i),
                StateStatus::Running,
            );
            store.append(&event).await.unwrap();
        }

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 5);

        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.state, Some(format!("state{}", i)));
        }
    }

    #[tokio::test]
    async fn test_list_runs() {
        let temp_dir = TempDir::new().unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        EventStore::open_in(temp_dir.path(), first).await.unwrap();
        EventStore::open_in(temp_dir.path(), second).await.unwrap();

        let mut runs = EventStore::list_runs_in(temp_dir.path()).await.unwrap();
        runs.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(runs, expected);
    }

    #[test]
    fn test_idempotency_key_format() {
        let run_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = generate_idempotency_key(run_id, "create_database", "{\"action\":\"x\"}");

        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(parts[1], "create_database");
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_payload_hash_consistency() {
        let hash1 = hash_payload("payload");
        let hash2 = hash_payload("payload");
        let hash3 = hash_payload("different payload");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }
}
