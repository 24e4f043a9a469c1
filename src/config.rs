//! Configuration for meshreg.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MESHREG_HOME)
//! 2. Config file (.meshreg/config.yaml)
//! 3. Defaults (~/.meshreg)
//!
//! Config file discovery:
//! - Searches current directory and parents for .meshreg/config.yaml
//! - Paths in config file are relative to the config file's directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub execution: Option<ExecutionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub step_timeout_seconds: Option<u64>,
    pub retry: Option<RetryPolicy>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to meshreg home (engine state)
    pub home: PathBuf,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    /// Workflow execution settings
    pub execution: ExecutionSettings,
}

/// Step timeout and retry settings for workflow execution
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Per-step timeout in seconds
    pub step_timeout_seconds: u64,

    /// Retry policy for transient step failures
    pub retry: RetryPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            step_timeout_seconds: 300,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutionSettings {
    /// Per-step timeout as a Duration
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".meshreg").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".meshreg");

    let config_file = find_config_file();

    let (home, execution) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;
        let meshreg_dir = config_path.parent().unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("MESHREG_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(meshreg_dir, home_path)
        } else {
            default_home.clone()
        };

        let execution = ExecutionSettings {
            step_timeout_seconds: config
                .execution
                .as_ref()
                .and_then(|e| e.step_timeout_seconds)
                .unwrap_or(300),
            retry: config
                .execution
                .as_ref()
                .and_then(|e| e.retry.clone())
                .unwrap_or_default(),
        };

        (home, execution)
    } else {
        let home = std::env::var("MESHREG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        (home, ExecutionSettings::default())
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        execution,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the runs directory ($MESHREG_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let meshreg_dir = temp.path().join(".meshreg");
        std::fs::create_dir_all(&meshreg_dir).unwrap();

        let config_path = meshreg_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
execution:
  step_timeout_seconds: 30
  retry:
    max_attempts: 5
    initial_delay_ms: 100
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));

        let execution = config.execution.unwrap();
        assert_eq!(execution.step_timeout_seconds, Some(30));

        let retry = execution.retry.unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay_ms, 100);
        // Unset fields fall back to defaults
        assert_eq!(retry.max_delay_ms, 30000);
    }

    #[test]
    fn test_default_execution_settings() {
        let settings = ExecutionSettings::default();
        assert_eq!(settings.step_timeout(), Duration::from_secs(300));
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        // Non-existent relative paths fall back to a simple join
        assert_eq!(
            resolve_path(&base, "./state"),
            PathBuf::from("/home/user/project/./state")
        );
    }
}
