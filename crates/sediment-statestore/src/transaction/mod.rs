//! Transactions: immutable commands that change the materialised state.
//!
//! Each table has two independent logs. File-reference transactions fold into
//! a [`FileReferenceState`](crate::model::FileReferenceState); partition
//! transactions fold into a [`PartitionTree`](crate::model::PartitionTree).
//! A transaction validates itself against the latest state and then applies
//! itself; validation is re-run on every retry.

mod files;
mod partitions;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use files::{
    AddFilesTransaction, AssignJobIdRequest, AssignJobIdsTransaction, DeleteFilesTransaction,
    FileReferenceTransaction, ReplaceFileReferencesTransaction, SplitFileReferenceRequest,
    SplitFileReferencesTransaction,
};
pub use partitions::{
    InitialisePartitionsTransaction, PartitionTransaction, SplitPartitionTransaction,
};

/// Identifies one of the two logs kept per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogKind {
    /// File reference transactions.
    Files,
    /// Partition transactions.
    Partitions,
}

impl LogKind {
    /// Returns the name used in storage paths and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Partitions => "partitions",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command recorded in a transaction log.
///
/// `apply` is only called after `validate` has succeeded against the same
/// state, and must be deterministic: replaying a log always produces the same
/// state.
pub trait StateTransaction:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The state this transaction folds into.
    type State: Clone + Default + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// The log this transaction is written to.
    const LOG: LogKind;

    /// Short name of the transaction type, for logs and metrics.
    fn kind(&self) -> &'static str;

    /// Checks the transaction can be applied to `state`.
    ///
    /// # Errors
    ///
    /// Returns the semantic conflict that makes the transaction invalid.
    fn validate(&self, state: &Self::State) -> Result<(), ValidationError>;

    /// Applies the transaction, stamping changes with `update_time`.
    fn apply(&self, state: &mut Self::State, update_time: DateTime<Utc>);
}
