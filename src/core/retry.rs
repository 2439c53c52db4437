//! Retry policy and the per-run retry state machine.
//!
//! Every task run moves through
//! `Pending -> Running -> (Succeeded | Retrying(n) -> Running) -> (Succeeded | Failed)`.
//! The runner drives these transitions from a single loop; this module only
//! encodes which transition is legal.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Fixed-delay retry policy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries, not including the initial attempt (0 = no retries).
    /// For example, `max_retries = 3` means up to 4 attempts in total.
    pub max_retries: u32,

    /// Fixed delay between attempts.
    #[serde(with = "serde_millis")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Create a policy with fixed delay retries.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Check if another attempt is allowed after `retry_count` has failed.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

/// State of one logical task run.
///
/// `retry_count` is the zero-based attempt number; it is also what each
/// execution row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// The run has been fired but no attempt has started.
    Pending,
    /// An attempt is executing.
    Running { retry_count: u32 },
    /// An attempt failed and the next one is waiting for the retry delay.
    Retrying { retry_count: u32 },
    /// An attempt succeeded.
    Succeeded { retry_count: u32 },
    /// The last allowed attempt failed.
    Failed { retry_count: u32 },
}

impl RetryState {
    /// Begin the next attempt.
    pub fn start(self) -> Self {
        match self {
            RetryState::Pending => RetryState::Running { retry_count: 0 },
            RetryState::Retrying { retry_count } => RetryState::Running { retry_count },
            other => other,
        }
    }

    /// Record a successful attempt.
    pub fn succeed(self) -> Self {
        match self {
            RetryState::Running { retry_count } => RetryState::Succeeded { retry_count },
            other => other,
        }
    }

    /// Record a failed attempt, moving to `Retrying` or `Failed` per the policy.
    pub fn fail(self, policy: &RetryPolicy) -> Self {
        match self {
            RetryState::Running { retry_count } if policy.should_retry(retry_count) => {
                RetryState::Retrying {
                    retry_count: retry_count + 1,
                }
            }
            RetryState::Running { retry_count } => RetryState::Failed { retry_count },
            other => other,
        }
    }

    /// Attempt number of the current or upcoming attempt.
    pub fn retry_count(&self) -> u32 {
        match self {
            RetryState::Pending => 0,
            RetryState::Running { retry_count }
            | RetryState::Retrying { retry_count }
            | RetryState::Succeeded { retry_count }
            | RetryState::Failed { retry_count } => *retry_count,
        }
    }

    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. } | RetryState::Failed { .. }
        )
    }
}

/// Serde helper for Duration serialization as milliseconds.
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
