//! Strongly-typed identifiers for tables and jobs.
//!
//! Table IDs are validated because they become storage prefixes. Job IDs are
//! opaque: callers may supply their own, or generate a ULID which sorts by
//! creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for a table.
///
/// Table IDs must be:
/// - Between 3 and 63 characters
/// - Lowercase alphanumeric with hyphens or underscores
/// - Not start or end with a hyphen
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    /// Creates a new table ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the table ID is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generates a fresh table ID from a lowercased ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_ascii_lowercase())
    }

    /// Returns the storage prefix for this table, `table={id}/`.
    #[must_use]
    pub fn storage_prefix(&self) -> String {
        format!("table={}/", self.0)
    }

    /// Returns the table ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        if id.len() < 3 {
            return Err(Error::InvalidId {
                message: format!("table ID '{id}' is too short (minimum 3 characters)"),
            });
        }

        if id.len() > 63 {
            return Err(Error::InvalidId {
                message: format!("table ID '{id}' is too long (maximum 63 characters)"),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::InvalidId {
                message: format!(
                    "table ID '{id}' contains invalid characters (allowed: a-z, 0-9, '-', '_')"
                ),
            });
        }

        if id.starts_with('-') || id.ends_with('-') {
            return Err(Error::InvalidId {
                message: format!("table ID '{id}' cannot start or end with a hyphen"),
            });
        }

        Ok(())
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for TableId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of an ingest or compaction job.
///
/// Multiple runs of the same job (retries) share one `JobId`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wraps an existing job identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new unique job ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Returns the job ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_table_ids() {
        assert!(TableId::new("events").is_ok());
        assert!(TableId::new("click_stream-2024").is_ok());
        assert!(TableId::new("abc").is_ok());
    }

    #[test]
    fn invalid_table_ids() {
        assert!(TableId::new("").is_err());
        assert!(TableId::new("ab").is_err());
        assert!(TableId::new("UPPER").is_err());
        assert!(TableId::new("-leading").is_err());
        assert!(TableId::new("trailing-").is_err());
        assert!(TableId::new("has/slash").is_err());
        assert!(TableId::new("x".repeat(64)).is_err());
    }

    #[test]
    fn generated_table_id_is_valid() {
        let id = TableId::generate();
        assert!(TableId::new(id.as_str()).is_ok());
    }

    #[test]
    fn table_storage_prefix() {
        let table = TableId::new("events").unwrap();
        assert_eq!(table.storage_prefix(), "table=events/");
    }

    #[test]
    fn job_ids_are_unique_and_serialize_transparently() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);

        let json = serde_json::to_string(&JobId::new("job-1")).unwrap();
        assert_eq!(json, "\"job-1\"");
    }
}
