//! File references and the materialised file state.
//!
//! A physical file may be referenced from several partitions at once: after a
//! partition is split, the file's rows logically belong to both children until
//! compaction rewrites it. Each [`FileReference`] means "this file, restricted
//! to rows in this partition". A file whose last reference has been removed
//! stays tracked with zero references until garbage collection deletes it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sediment_core::JobId;

/// Which kind of job wrote a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileOrigin {
    /// Written by an ingest job.
    Ingest,
    /// Written by a compaction job.
    Compaction,
}

/// A reference to a file from one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    /// Globally unique filename (object key in the data store).
    pub filename: String,
    /// Partition the referenced rows belong to.
    pub partition_id: String,
    /// Number of records in this reference.
    pub number_of_records: u64,
    /// True if `number_of_records` is an estimate, e.g. after a reference split.
    #[serde(default)]
    pub count_approximate: bool,
    /// True if every row in the file belongs to this partition.
    #[serde(default = "default_true")]
    pub only_contains_data_for_this_partition: bool,
    /// Compaction job currently holding this reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Kind of job that wrote the file.
    pub origin: FileOrigin,
    /// Time of the transaction that last changed this reference, set by the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<DateTime<Utc>>,
}

const fn default_true() -> bool {
    true
}

impl FileReference {
    /// Creates a reference for a whole file written by ingest.
    #[must_use]
    pub fn ingested(
        filename: impl Into<String>,
        partition_id: impl Into<String>,
        number_of_records: u64,
    ) -> Self {
        Self::new(filename, partition_id, number_of_records, FileOrigin::Ingest)
    }

    /// Creates a reference for a whole file written by compaction.
    #[must_use]
    pub fn compacted(
        filename: impl Into<String>,
        partition_id: impl Into<String>,
        number_of_records: u64,
    ) -> Self {
        Self::new(
            filename,
            partition_id,
            number_of_records,
            FileOrigin::Compaction,
        )
    }

    fn new(
        filename: impl Into<String>,
        partition_id: impl Into<String>,
        number_of_records: u64,
        origin: FileOrigin,
    ) -> Self {
        Self {
            filename: filename.into(),
            partition_id: partition_id.into(),
            number_of_records,
            count_approximate: false,
            only_contains_data_for_this_partition: true,
            job_id: None,
            origin,
            last_updated_time: None,
        }
    }

    /// Returns a copy of this reference pointing at a sub-partition, with an
    /// estimated half of the records.
    #[must_use]
    pub fn split_to(&self, partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            number_of_records: self.number_of_records / 2,
            count_approximate: true,
            only_contains_data_for_this_partition: false,
            job_id: None,
            last_updated_time: None,
            ..self.clone()
        }
    }

    /// Returns a copy with the job ID set.
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// All references to one physical file.
///
/// Invariant: at most one reference per partition. The reference count used by
/// garbage collection is `references.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReferences {
    /// The filename.
    pub filename: String,
    /// References keyed by partition ID.
    pub references: BTreeMap<String, FileReference>,
    /// Time of the transaction that last changed any reference to this file.
    pub last_updated_time: DateTime<Utc>,
}

impl FileReferences {
    /// Returns the number of partitions referencing this file.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Returns true if no partition references this file.
    #[must_use]
    pub fn is_unreferenced(&self) -> bool {
        self.references.is_empty()
    }
}

/// Filenames with no references, capped at a maximum count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreferencedFiles {
    /// Filenames in ascending order.
    pub filenames: Vec<String>,
    /// True if more files matched than were returned.
    pub more_than_max: bool,
}

/// Materialised file state: every tracked file, keyed by filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReferenceState {
    files: BTreeMap<String, FileReferences>,
}

impl FileReferenceState {
    /// Looks up a tracked file.
    #[must_use]
    pub fn file(&self, filename: &str) -> Option<&FileReferences> {
        self.files.get(filename)
    }

    /// Looks up one reference.
    #[must_use]
    pub fn reference(&self, filename: &str, partition_id: &str) -> Option<&FileReference> {
        self.files.get(filename)?.references.get(partition_id)
    }

    /// Iterates over all tracked files, referenced or not.
    pub fn files(&self) -> impl Iterator<Item = &FileReferences> {
        self.files.values()
    }

    /// Iterates over every live reference, ordered by filename then partition.
    pub fn references(&self) -> impl Iterator<Item = &FileReference> {
        self.files.values().flat_map(|f| f.references.values())
    }

    /// Returns the number of live references.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.files.values().map(FileReferences::reference_count).sum()
    }

    /// Returns unreferenced files last updated strictly before `cutoff`.
    #[must_use]
    pub fn unreferenced_before(&self, cutoff: DateTime<Utc>, max: usize) -> UnreferencedFiles {
        let mut matching = self
            .files
            .values()
            .filter(|f| f.is_unreferenced() && f.last_updated_time < cutoff)
            .map(|f| f.filename.clone());
        let filenames: Vec<String> = matching.by_ref().take(max).collect();
        let more_than_max = matching.next().is_some();
        UnreferencedFiles {
            filenames,
            more_than_max,
        }
    }

    pub(crate) fn add_reference(&mut self, mut reference: FileReference, time: DateTime<Utc>) {
        reference.last_updated_time = Some(time);
        let file = self
            .files
            .entry(reference.filename.clone())
            .or_insert_with(|| FileReferences {
                filename: reference.filename.clone(),
                references: BTreeMap::new(),
                last_updated_time: time,
            });
        file.last_updated_time = time;
        file.references
            .insert(reference.partition_id.clone(), reference);
    }

    pub(crate) fn remove_reference(
        &mut self,
        filename: &str,
        partition_id: &str,
        time: DateTime<Utc>,
    ) {
        if let Some(file) = self.files.get_mut(filename) {
            if file.references.remove(partition_id).is_some() {
                file.last_updated_time = time;
            }
        }
    }

    pub(crate) fn set_job_id(
        &mut self,
        filename: &str,
        partition_id: &str,
        job_id: &JobId,
        time: DateTime<Utc>,
    ) {
        if let Some(file) = self.files.get_mut(filename) {
            if let Some(reference) = file.references.get_mut(partition_id) {
                reference.job_id = Some(job_id.clone());
                reference.last_updated_time = Some(time);
                file.last_updated_time = time;
            }
        }
    }

    pub(crate) fn remove_all_references(&mut self, time: DateTime<Utc>) {
        for file in self.files.values_mut() {
            if !file.references.is_empty() {
                file.references.clear();
                file.last_updated_time = time;
            }
        }
    }

    pub(crate) fn remove_file(&mut self, filename: &str) {
        self.files.remove(filename);
    }
}
