//! Garbage collection settings.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Settings for a garbage collection run.
///
/// # Example
///
/// ```rust
/// use sediment_statestore::gc::GcConfig;
///
/// let config = GcConfig {
///     min_unreferenced_age_minutes: 30,
///     ..GcConfig::default()
/// };
/// assert!(config.validate().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GcConfig {
    /// Minimum time (in minutes) a file must have had no references before
    /// it is deleted.
    ///
    /// Queries that listed their files before the last reference was removed
    /// may still be reading the file. Anything younger than this is left for
    /// a later run.
    pub min_unreferenced_age_minutes: u32,

    /// Most files collected from one table in one run.
    pub max_files_per_table: usize,

    /// Most files forgotten by one delete transaction.
    pub delete_batch_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            min_unreferenced_age_minutes: 10,
            max_files_per_table: 100_000,
            delete_batch_size: 1_000,
        }
    }
}

impl GcConfig {
    /// Settings for tests: no minimum age, small batches.
    #[must_use]
    pub const fn testing() -> Self {
        Self {
            min_unreferenced_age_minutes: 0,
            max_files_per_table: 1_000,
            delete_batch_size: 10,
        }
    }

    /// Minimum unreferenced age as a duration.
    #[must_use]
    pub fn min_unreferenced_age(&self) -> Duration {
        Duration::minutes(i64::from(self.min_unreferenced_age_minutes))
    }

    /// Validates the settings.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<String> {
        if self.max_files_per_table == 0 {
            return Some("max_files_per_table must be at least 1".to_string());
        }
        if self.delete_batch_size == 0 {
            return Some("delete_batch_size must be at least 1".to_string());
        }
        None
    }
}
