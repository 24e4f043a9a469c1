//! Step-level failure policies.
//!
//! Two mechanisms cover the two recoverable failure classes: bounded
//! retry with exponential backoff for transient backend trouble, and
//! recovery guards that absorb already-exists failures at states where a
//! prior run provisioned the resource.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::{ResourceKind, StepFailure};

/// Retry policy for transient step failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Recovery guard on a workflow state.
///
/// When the state's action fails because its resource already exists,
/// control proceeds to the next state instead of aborting the run. This
/// is what makes re-submitting the same request safe: re-registration is
/// a signal to move on, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryGuard {
    /// Resource kind whose already-exists failure is absorbed
    pub on: ResourceKind,
}

impl RecoveryGuard {
    /// Guard absorbing already-exists failures for `on`
    pub const fn already_exists(on: ResourceKind) -> Self {
        Self { on }
    }

    /// Whether this guard absorbs the given failure
    pub fn absorbs(&self, failure: &StepFailure) -> bool {
        matches!(
            failure,
            StepFailure::AlreadyExists { resource, .. } if *resource == self.on
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ActionKind;

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_guard_absorbs_matching_resource_only() {
        let guard = RecoveryGuard::already_exists(ResourceKind::Database);

        assert!(guard.absorbs(&StepFailure::AlreadyExists {
            resource: ResourceKind::Database,
            name: "111111111111_sales".to_string(),
        }));

        assert!(!guard.absorbs(&StepFailure::AlreadyExists {
            resource: ResourceKind::Table,
            name: "orders".to_string(),
        }));

        assert!(!guard.absorbs(&StepFailure::AccessDenied {
            action: ActionKind::CreateDatabase,
            message: "denied".to_string(),
        }));
    }
}
