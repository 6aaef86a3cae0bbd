//! State store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry and snapshot settings for a state store.
///
/// The retry budget bounds how long an update keeps re-reading the log and
/// re-validating after losing an append race. Whichever of `max_add_attempts`
/// and `max_retry_elapsed_ms` is reached first ends the loop.
///
/// # Example
///
/// ```rust
/// use sediment_statestore::StateStoreConfig;
///
/// let config = StateStoreConfig {
///     max_add_attempts: 5,
///     ..StateStoreConfig::default()
/// };
/// assert!(config.validate().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StateStoreConfig {
    /// Smallest backoff ceiling, used for the first retry.
    pub min_retry_wait_ms: u64,

    /// Largest backoff ceiling. Later retries wait a random time up to this.
    pub max_retry_wait_ms: u64,

    /// Total time after which no further retry is started.
    pub max_retry_elapsed_ms: u64,

    /// Maximum number of append attempts per update, including the first.
    pub max_add_attempts: u32,

    /// Start from the latest log snapshot instead of replaying from the
    /// beginning.
    pub load_latest_snapshot: bool,

    /// Transactions that must follow the last snapshot before another is
    /// written.
    pub snapshot_min_transactions: u64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            min_retry_wait_ms: 50,
            max_retry_wait_ms: 5_000,
            max_retry_elapsed_ms: 120_000,
            max_add_attempts: 50,
            load_latest_snapshot: false,
            snapshot_min_transactions: 100,
        }
    }
}

impl StateStoreConfig {
    /// Settings for tests: tiny waits, plenty of attempts.
    #[must_use]
    pub const fn testing() -> Self {
        Self {
            min_retry_wait_ms: 1,
            max_retry_wait_ms: 10,
            max_retry_elapsed_ms: 30_000,
            max_add_attempts: 100,
            load_latest_snapshot: false,
            snapshot_min_transactions: 1,
        }
    }

    /// Smallest backoff ceiling as a duration.
    #[must_use]
    pub const fn min_retry_wait(&self) -> Duration {
        Duration::from_millis(self.min_retry_wait_ms)
    }

    /// Largest backoff ceiling as a duration.
    #[must_use]
    pub const fn max_retry_wait(&self) -> Duration {
        Duration::from_millis(self.max_retry_wait_ms)
    }

    /// Retry time budget as a duration.
    #[must_use]
    pub const fn max_retry_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_retry_elapsed_ms)
    }

    /// Validates the settings.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<String> {
        if self.max_add_attempts == 0 {
            return Some("max_add_attempts must be at least 1".to_string());
        }
        if self.min_retry_wait_ms > self.max_retry_wait_ms {
            return Some(format!(
                "min_retry_wait_ms ({}) cannot exceed max_retry_wait_ms ({})",
                self.min_retry_wait_ms, self.max_retry_wait_ms
            ));
        }
        if self.snapshot_min_transactions == 0 {
            return Some("snapshot_min_transactions must be at least 1".to_string());
        }
        None
    }
}
