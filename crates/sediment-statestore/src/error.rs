//! Error types for state store operations.
//!
//! Errors fall into four groups:
//! - **Conflicts** ([`TransactionLogError::DuplicateTransactionNumber`]): another
//!   writer won the append race. Retried internally with fresh validation.
//! - **Validation** ([`ValidationError`]): the transaction is semantically
//!   invalid against the latest state. Never retried.
//! - **Exhaustion** ([`StateStoreError::RetriesExhausted`]): the retry budget ran
//!   out. The caller's job should fail and be resubmitted.
//! - **Infrastructure** (storage, serialization): surfaced as-is.

use std::time::Duration;

use thiserror::Error;

use sediment_core::JobId;

use crate::transaction::LogKind;

/// Result type alias for state store operations.
pub type Result<T> = std::result::Result<T, StateStoreError>;

/// Errors raised by a transaction log store.
#[derive(Debug, Error)]
pub enum TransactionLogError {
    /// An entry with this sequence number already exists.
    #[error("transaction {number} already exists in the {log} log")]
    DuplicateTransactionNumber {
        /// Which log.
        log: LogKind,
        /// The contested sequence number.
        number: u64,
    },

    /// The sequence number would leave a gap after the latest entry.
    #[error("transaction {number} is too high for the {log} log, expected {expected}")]
    TransactionNumberTooHigh {
        /// Which log.
        log: LogKind,
        /// The rejected sequence number.
        number: u64,
        /// The next sequence number the log would accept.
        expected: u64,
    },

    /// An entry read back from the log is malformed or out of order.
    #[error("corrupt entry in the {log} log: {message}")]
    CorruptEntry {
        /// Which log.
        log: LogKind,
        /// What was wrong.
        message: String,
    },

    /// The underlying storage failed.
    #[error(transparent)]
    Storage(#[from] sediment_core::Error),
}

/// A transaction is invalid against the current state.
///
/// Every variant names the file, partition or job involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A reference for this file and partition already exists.
    #[error("file reference already exists: {filename} in partition {partition_id}")]
    FileReferenceAlreadyExists {
        /// The filename.
        filename: String,
        /// The partition.
        partition_id: String,
    },

    /// The file is already tracked, with no references, awaiting deletion.
    #[error("file already exists and is awaiting garbage collection: {filename}")]
    FileAlreadyExists {
        /// The filename.
        filename: String,
    },

    /// No reference exists for this file and partition.
    #[error("file reference not found: {filename} in partition {partition_id}")]
    FileReferenceNotFound {
        /// The filename.
        filename: String,
        /// The partition.
        partition_id: String,
    },

    /// The reference is held by a different job.
    #[error("file reference {filename} in partition {partition_id} is assigned to job {job_id}")]
    FileReferenceAssignedToJob {
        /// The filename.
        filename: String,
        /// The partition.
        partition_id: String,
        /// The job currently holding the reference.
        job_id: JobId,
    },

    /// The reference is not held by the job trying to replace it.
    #[error(
        "file reference {filename} in partition {partition_id} is not assigned to job {expected_job_id} (assigned: {actual_job_id:?})"
    )]
    FileReferenceNotAssignedToJob {
        /// The filename.
        filename: String,
        /// The partition.
        partition_id: String,
        /// The job that expected to hold it.
        expected_job_id: JobId,
        /// The job actually holding it, if any.
        actual_job_id: Option<JobId>,
    },

    /// The file still has live references and cannot be forgotten.
    #[error("file {filename} still has {reference_count} references")]
    FileHasReferences {
        /// The filename.
        filename: String,
        /// Number of remaining references.
        reference_count: usize,
    },

    /// A compaction output has the same name as one of its inputs.
    #[error("new reference {filename} in partition {partition_id} replaces itself")]
    NewReferenceSameAsOldReference {
        /// The filename.
        filename: String,
        /// The partition.
        partition_id: String,
    },

    /// The same input file was listed twice.
    #[error("duplicate input file {filename} in partition {partition_id}")]
    DuplicateInputFile {
        /// The filename.
        filename: String,
        /// The partition.
        partition_id: String,
    },

    /// A request that must name at least one file named none.
    #[error("{operation} request has no files")]
    EmptyRequest {
        /// The operation that was requested.
        operation: &'static str,
    },

    /// A reference split request is not valid.
    #[error("cannot split reference {filename} in partition {partition_id}: {reason}")]
    InvalidReferenceSplit {
        /// The filename.
        filename: String,
        /// The partition of the reference being split.
        partition_id: String,
        /// Why the split is invalid.
        reason: String,
    },

    /// The partition does not exist.
    #[error("partition not found: {partition_id}")]
    PartitionNotFound {
        /// The partition.
        partition_id: String,
    },

    /// The partition has already been split.
    #[error("partition already split: {partition_id}")]
    PartitionAlreadySplit {
        /// The partition.
        partition_id: String,
    },

    /// A partition with this ID already exists.
    #[error("partition already exists: {partition_id}")]
    PartitionAlreadyExists {
        /// The partition.
        partition_id: String,
    },

    /// A partition split does not describe a valid division of the parent.
    #[error("invalid split of partition {partition_id}: {reason}")]
    InvalidPartitionSplit {
        /// The partition being split.
        partition_id: String,
        /// Why the split is invalid.
        reason: String,
    },

    /// A set of partitions does not form a valid tree.
    #[error("invalid partition tree: {reason}")]
    InvalidPartitionTree {
        /// Why the tree is invalid.
        reason: String,
    },

    /// Partitions cannot be reinitialised while file references exist.
    #[error("cannot initialise partitions while {reference_count} file references exist")]
    FilesExistOnInitialise {
        /// Number of live references.
        reference_count: usize,
    },
}

/// Errors raised by job status tracking.
#[derive(Debug, Error)]
pub enum JobStatusError {
    /// The job has no recorded status.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job.
        job_id: JobId,
    },

    /// The update is not allowed from the job's current status.
    #[error("invalid status update for job {job_id}: {update} not allowed when {current}")]
    InvalidTransition {
        /// The job.
        job_id: JobId,
        /// Current status description.
        current: String,
        /// Rejected update description.
        update: String,
    },

    /// The job status store's storage failed.
    #[error(transparent)]
    Storage(#[from] sediment_core::Error),
}

/// Errors returned by the state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The transaction is invalid against the latest state.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Conflicting writers kept winning until the retry budget ran out.
    #[error("{operation} failed after {attempts} attempts over {elapsed:?}")]
    RetriesExhausted {
        /// The operation that gave up.
        operation: &'static str,
        /// Number of append attempts made.
        attempts: u32,
        /// Time spent retrying.
        elapsed: Duration,
    },

    /// The transaction log failed for a reason other than a retryable conflict.
    #[error("transaction log error: {0}")]
    Log(#[from] TransactionLogError),

    /// Storage failed outside the transaction log.
    #[error(transparent)]
    Storage(#[from] sediment_core::Error),

    /// A snapshot could not be written or read back.
    #[error("snapshot error: {message}")]
    Snapshot {
        /// Description of the failure.
        message: String,
    },

    /// A job status update was rejected.
    #[error(transparent)]
    JobStatus(#[from] JobStatusError),

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl StateStoreError {
    /// Returns the validation error, if this failure was a semantic conflict.
    #[must_use]
    pub const fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}
