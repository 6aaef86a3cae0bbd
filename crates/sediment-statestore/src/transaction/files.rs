//! Transactions on the file reference log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sediment_core::JobId;

use super::{LogKind, StateTransaction};
use crate::error::ValidationError;
use crate::model::{FileReference, FileReferenceState};

/// A change to the file reference state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FileReferenceTransaction {
    /// Adds references to newly written files.
    AddFiles(AddFilesTransaction),
    /// Claims references for compaction jobs.
    AssignJobIds(AssignJobIdsTransaction),
    /// Commits a compaction: swaps input references for output references.
    ReplaceFileReferences(ReplaceFileReferencesTransaction),
    /// Moves references from a split partition onto its sub-partitions.
    SplitFileReferences(SplitFileReferencesTransaction),
    /// Removes every reference. Files stay tracked for garbage collection.
    ClearFiles,
    /// Forgets files that have been physically deleted.
    DeleteFiles(DeleteFilesTransaction),
}

impl StateTransaction for FileReferenceTransaction {
    type State = FileReferenceState;

    const LOG: LogKind = LogKind::Files;

    fn kind(&self) -> &'static str {
        match self {
            Self::AddFiles(_) => "add_files",
            Self::AssignJobIds(_) => "assign_job_ids",
            Self::ReplaceFileReferences(_) => "replace_file_references",
            Self::SplitFileReferences(_) => "split_file_references",
            Self::ClearFiles => "clear_files",
            Self::DeleteFiles(_) => "delete_files",
        }
    }

    fn validate(&self, state: &FileReferenceState) -> Result<(), ValidationError> {
        match self {
            Self::AddFiles(t) => t.validate(state),
            Self::AssignJobIds(t) => t.validate(state),
            Self::ReplaceFileReferences(t) => t.validate(state),
            Self::SplitFileReferences(t) => t.validate(state),
            Self::ClearFiles => Ok(()),
            Self::DeleteFiles(t) => t.validate(state),
        }
    }

    fn apply(&self, state: &mut FileReferenceState, update_time: DateTime<Utc>) {
        match self {
            Self::AddFiles(t) => t.apply(state, update_time),
            Self::AssignJobIds(t) => t.apply(state, update_time),
            Self::ReplaceFileReferences(t) => t.apply(state, update_time),
            Self::SplitFileReferences(t) => t.apply(state, update_time),
            Self::ClearFiles => state.remove_all_references(update_time),
            Self::DeleteFiles(t) => t.apply(state),
        }
    }
}

fn reference_not_found(filename: &str, partition_id: &str) -> ValidationError {
    ValidationError::FileReferenceNotFound {
        filename: filename.to_string(),
        partition_id: partition_id.to_string(),
    }
}

/// Rejects a new reference that clashes with the current state.
///
/// A file that is tracked with no references is waiting to be garbage
/// collected and must not be resurrected.
fn check_new_reference(
    state: &FileReferenceState,
    reference: &FileReference,
) -> Result<(), ValidationError> {
    if state
        .reference(&reference.filename, &reference.partition_id)
        .is_some()
    {
        return Err(ValidationError::FileReferenceAlreadyExists {
            filename: reference.filename.clone(),
            partition_id: reference.partition_id.clone(),
        });
    }
    if state
        .file(&reference.filename)
        .is_some_and(|f| f.is_unreferenced())
    {
        return Err(ValidationError::FileAlreadyExists {
            filename: reference.filename.clone(),
        });
    }
    Ok(())
}

/// Rejects two references to the same file and partition in one request.
fn check_unique<'a>(
    references: impl IntoIterator<Item = &'a FileReference>,
) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for reference in references {
        if !seen.insert((reference.filename.as_str(), reference.partition_id.as_str())) {
            return Err(ValidationError::FileReferenceAlreadyExists {
                filename: reference.filename.clone(),
                partition_id: reference.partition_id.clone(),
            });
        }
    }
    Ok(())
}

/// Adds references to files written by ingest or compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFilesTransaction {
    /// References to add.
    pub references: Vec<FileReference>,
}

impl AddFilesTransaction {
    /// Creates the transaction.
    #[must_use]
    pub fn new(references: Vec<FileReference>) -> Self {
        Self { references }
    }

    fn validate(&self, state: &FileReferenceState) -> Result<(), ValidationError> {
        if self.references.is_empty() {
            return Err(ValidationError::EmptyRequest {
                operation: "add files",
            });
        }
        check_unique(&self.references)?;
        for reference in &self.references {
            check_new_reference(state, reference)?;
        }
        Ok(())
    }

    fn apply(&self, state: &mut FileReferenceState, update_time: DateTime<Utc>) {
        for reference in &self.references {
            state.add_reference(reference.clone(), update_time);
        }
    }
}

/// Claim of a set of files in one partition for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignJobIdRequest {
    /// The claiming job.
    pub job_id: JobId,
    /// Partition of the claimed references.
    pub partition_id: String,
    /// Files whose references in `partition_id` are claimed.
    pub filenames: Vec<String>,
}

impl AssignJobIdRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        job_id: impl Into<JobId>,
        partition_id: impl Into<String>,
        filenames: Vec<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            partition_id: partition_id.into(),
            filenames,
        }
    }
}

/// Sets the job ID on file references, compare-and-set style.
///
/// A reference may be claimed if it has no job, or is already held by the
/// same job. Any reference held by another job fails the whole transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignJobIdsTransaction {
    /// Claims to make atomically.
    pub requests: Vec<AssignJobIdRequest>,
}

impl AssignJobIdsTransaction {
    /// Creates the transaction.
    #[must_use]
    pub fn new(requests: Vec<AssignJobIdRequest>) -> Self {
        Self { requests }
    }

    fn validate(&self, state: &FileReferenceState) -> Result<(), ValidationError> {
        if self.requests.iter().all(|r| r.filenames.is_empty()) {
            return Err(ValidationError::EmptyRequest {
                operation: "assign job ids",
            });
        }

        // claims made earlier in this transaction count as held
        let mut claimed: BTreeMap<(&str, &str), &JobId> = BTreeMap::new();
        for request in &self.requests {
            for filename in &request.filenames {
                let reference = state
                    .reference(filename, &request.partition_id)
                    .ok_or_else(|| reference_not_found(filename, &request.partition_id))?;

                let key = (filename.as_str(), request.partition_id.as_str());
                let holder = claimed.get(&key).copied().or(reference.job_id.as_ref());
                if let Some(holder) = holder {
                    if holder != &request.job_id {
                        return Err(ValidationError::FileReferenceAssignedToJob {
                            filename: filename.clone(),
                            partition_id: request.partition_id.clone(),
                            job_id: holder.clone(),
                        });
                    }
                }
                claimed.insert(key, &request.job_id);
            }
        }
        Ok(())
    }

    fn apply(&self, state: &mut FileReferenceState, update_time: DateTime<Utc>) {
        for request in &self.requests {
            for filename in &request.filenames {
                state.set_job_id(filename, &request.partition_id, &request.job_id, update_time);
            }
        }
    }
}

/// Commits a compaction job.
///
/// Removes the job's input references in one partition and adds its output
/// references in a single log entry. Fails if any input is no longer held by
/// the job, e.g. after its claim was lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceFileReferencesTransaction {
    /// The job that compacted the inputs.
    pub job_id: JobId,
    /// Partition of the input references.
    pub partition_id: String,
    /// Input files.
    pub input_files: Vec<String>,
    /// Output references, usually one file in the same partition.
    pub new_references: Vec<FileReference>,
}

impl ReplaceFileReferencesTransaction {
    /// Creates the transaction.
    #[must_use]
    pub fn new(
        job_id: impl Into<JobId>,
        partition_id: impl Into<String>,
        input_files: Vec<String>,
        new_references: Vec<FileReference>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            partition_id: partition_id.into(),
            input_files,
            new_references,
        }
    }

    fn validate(&self, state: &FileReferenceState) -> Result<(), ValidationError> {
        if self.input_files.is_empty() {
            return Err(ValidationError::EmptyRequest {
                operation: "replace file references",
            });
        }

        let mut inputs = BTreeSet::new();
        for filename in &self.input_files {
            if !inputs.insert(filename.as_str()) {
                return Err(ValidationError::DuplicateInputFile {
                    filename: filename.clone(),
                    partition_id: self.partition_id.clone(),
                });
            }
            let reference = state
                .reference(filename, &self.partition_id)
                .ok_or_else(|| reference_not_found(filename, &self.partition_id))?;
            if reference.job_id.as_ref() != Some(&self.job_id) {
                return Err(ValidationError::FileReferenceNotAssignedToJob {
                    filename: filename.clone(),
                    partition_id: self.partition_id.clone(),
                    expected_job_id: self.job_id.clone(),
                    actual_job_id: reference.job_id.clone(),
                });
            }
        }

        check_unique(&self.new_references)?;
        for reference in &self.new_references {
            if inputs.contains(reference.filename.as_str()) {
                return Err(ValidationError::NewReferenceSameAsOldReference {
                    filename: reference.filename.clone(),
                    partition_id: reference.partition_id.clone(),
                });
            }
            check_new_reference(state, reference)?;
            if state.file(&reference.filename).is_some() {
                return Err(ValidationError::FileAlreadyExists {
                    filename: reference.filename.clone(),
                });
            }
        }
        Ok(())
    }

    fn apply(&self, state: &mut FileReferenceState, update_time: DateTime<Utc>) {
        for filename in &self.input_files {
            state.remove_reference(filename, &self.partition_id, update_time);
        }
        for reference in &self.new_references {
            let mut reference = reference.clone();
            reference.job_id = None;
            state.add_reference(reference, update_time);
        }
    }
}

/// Replaces one reference with references on sub-partitions of its partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitFileReferenceRequest {
    /// The file.
    pub filename: String,
    /// Partition of the reference being split.
    pub from_partition_id: String,
    /// Replacement references, all to the same file.
    pub new_references: Vec<FileReference>,
}

impl SplitFileReferenceRequest {
    /// Splits the reference `reference` onto each of `partition_ids`, halving
    /// the record estimate.
    #[must_use]
    pub fn split_to(reference: &FileReference, partition_ids: &[&str]) -> Self {
        Self {
            filename: reference.filename.clone(),
            from_partition_id: reference.partition_id.clone(),
            new_references: partition_ids
                .iter()
                .map(|id| reference.split_to(*id))
                .collect(),
        }
    }
}

/// Re-routes references held on split partitions onto their children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitFileReferencesTransaction {
    /// Splits to make atomically.
    pub requests: Vec<SplitFileReferenceRequest>,
}

impl SplitFileReferencesTransaction {
    /// Creates the transaction.
    #[must_use]
    pub fn new(requests: Vec<SplitFileReferenceRequest>) -> Self {
        Self { requests }
    }

    fn validate(&self, state: &FileReferenceState) -> Result<(), ValidationError> {
        if self.requests.is_empty() {
            return Err(ValidationError::EmptyRequest {
                operation: "split file references",
            });
        }

        let mut sources = BTreeSet::new();
        for request in &self.requests {
            let invalid = |reason: &str| ValidationError::InvalidReferenceSplit {
                filename: request.filename.clone(),
                partition_id: request.from_partition_id.clone(),
                reason: reason.to_string(),
            };

            if !sources.insert((request.filename.as_str(), request.from_partition_id.as_str())) {
                return Err(invalid("reference is split twice"));
            }
            let existing = state
                .reference(&request.filename, &request.from_partition_id)
                .ok_or_else(|| reference_not_found(&request.filename, &request.from_partition_id))?;
            if let Some(job_id) = &existing.job_id {
                return Err(ValidationError::FileReferenceAssignedToJob {
                    filename: request.filename.clone(),
                    partition_id: request.from_partition_id.clone(),
                    job_id: job_id.clone(),
                });
            }
            if request.new_references.is_empty() {
                return Err(invalid("no new references"));
            }
            for reference in &request.new_references {
                if reference.filename != request.filename {
                    return Err(invalid(&format!(
                        "new reference is to a different file {}",
                        reference.filename
                    )));
                }
                if reference.partition_id == request.from_partition_id {
                    return Err(invalid("new reference is to the same partition"));
                }
                if state
                    .reference(&reference.filename, &reference.partition_id)
                    .is_some()
                {
                    return Err(ValidationError::FileReferenceAlreadyExists {
                        filename: reference.filename.clone(),
                        partition_id: reference.partition_id.clone(),
                    });
                }
            }
        }
        check_unique(self.requests.iter().flat_map(|r| &r.new_references))
    }

    fn apply(&self, state: &mut FileReferenceState, update_time: DateTime<Utc>) {
        for request in &self.requests {
            state.remove_reference(&request.filename, &request.from_partition_id, update_time);
            for reference in &request.new_references {
                let mut reference = reference.clone();
                reference.job_id = None;
                state.add_reference(reference, update_time);
            }
        }
    }
}

/// Forgets files after garbage collection deleted them.
///
/// Files that are not tracked are skipped, so repeating a delete is harmless.
/// A file that still has references fails the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesTransaction {
    /// Filenames to forget.
    pub filenames: Vec<String>,
}

impl DeleteFilesTransaction {
    /// Creates the transaction.
    #[must_use]
    pub fn new(filenames: Vec<String>) -> Self {
        Self { filenames }
    }

    fn validate(&self, state: &FileReferenceState) -> Result<(), ValidationError> {
        for filename in &self.filenames {
            if let Some(file) = state.file(filename) {
                if !file.is_unreferenced() {
                    return Err(ValidationError::FileHasReferences {
                        filename: filename.clone(),
                        reference_count: file.reference_count(),
                    });
                }
            }
        }
        Ok(())
    }

    fn apply(&self, state: &mut FileReferenceState) {
        for filename in &self.filenames {
            state.remove_file(filename);
        }
    }
}
