//! The state store: the public API over a table's two transaction logs.
//!
//! Every update reads the latest state by replaying new log entries, validates
//! the transaction against it, and appends it with optimistic concurrency.
//! When another writer takes the sequence number first, the update re-reads,
//! re-validates and tries again with backoff until its retry budget runs out.
//!
//! The file and partition logs are independent. An operation that needs both
//! (splitting references, say) reads the partition tree first and then updates
//! the file log; there is no atomicity across the two.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use sediment_core::observability::statestore_span;
use sediment_core::{JobId, StorageBackend, TableId, TableStorage};

use crate::config::StateStoreConfig;
use crate::error::{Result, StateStoreError, ValidationError};
use crate::head::TransactionLogHead;
use crate::log::{InMemoryTransactionLogStore, ObjectTransactionLogStore, TransactionLogStore};
use crate::model::{
    FileReference, Partition, PartitionTree, PartitionsBuilder, TableProperties,
    UnreferencedFiles,
};
use crate::snapshot::TransactionLogSnapshotStore;
use crate::transaction::{
    AddFilesTransaction, AssignJobIdRequest, AssignJobIdsTransaction, DeleteFilesTransaction,
    FileReferenceTransaction, InitialisePartitionsTransaction, PartitionTransaction,
    ReplaceFileReferencesTransaction, SplitFileReferenceRequest, SplitFileReferencesTransaction,
    SplitPartitionTransaction,
};

/// The logs backing one table.
///
/// Cloning shares the underlying stores, so several state store instances
/// built from clones behave as concurrent writers to the same table.
#[derive(Clone)]
pub struct TransactionLogs {
    /// File reference log.
    pub files: Arc<dyn TransactionLogStore<FileReferenceTransaction>>,
    /// Partition log.
    pub partitions: Arc<dyn TransactionLogStore<PartitionTransaction>>,
    /// Snapshot storage, if snapshots are used.
    pub snapshots: Option<TransactionLogSnapshotStore>,
}

impl std::fmt::Debug for TransactionLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLogs")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl TransactionLogs {
    /// Logs held in process memory, without snapshots.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            files: Arc::new(InMemoryTransactionLogStore::new()),
            partitions: Arc::new(InMemoryTransactionLogStore::new()),
            snapshots: None,
        }
    }

    /// Logs and snapshots on object storage under the table's prefix.
    #[must_use]
    pub fn object_store(storage: &TableStorage) -> Self {
        Self {
            files: Arc::new(ObjectTransactionLogStore::new(storage.clone())),
            partitions: Arc::new(ObjectTransactionLogStore::new(storage.clone())),
            snapshots: Some(TransactionLogSnapshotStore::new(storage.clone())),
        }
    }
}

/// Sequence numbers of snapshots written by [`StateStore::create_snapshots`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotsCreated {
    /// File log snapshot, if one was written.
    pub files: Option<u64>,
    /// Partition log snapshot, if one was written.
    pub partitions: Option<u64>,
}

/// Transactional metadata store for one table.
pub struct StateStore {
    table: TableProperties,
    files: TransactionLogHead<FileReferenceTransaction>,
    partitions: TransactionLogHead<PartitionTransaction>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a state store over the given logs.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::InvalidConfig`] if the config is invalid.
    pub fn new(
        table: TableProperties,
        logs: TransactionLogs,
        config: StateStoreConfig,
    ) -> Result<Self> {
        if let Some(message) = config.validate() {
            return Err(StateStoreError::InvalidConfig { message });
        }
        let table_id = table.table_id.clone();
        Ok(Self {
            files: TransactionLogHead::new(
                table_id.clone(),
                logs.files,
                logs.snapshots.clone(),
                config.clone(),
            ),
            partitions: TransactionLogHead::new(table_id, logs.partitions, logs.snapshots, config),
            table,
        })
    }

    /// Creates a state store over fresh in-memory logs.
    #[must_use]
    pub fn in_memory(table: TableProperties) -> Self {
        let logs = TransactionLogs::in_memory();
        let table_id = table.table_id.clone();
        let config = StateStoreConfig::default();
        Self {
            files: TransactionLogHead::new(table_id.clone(), logs.files, None, config.clone()),
            partitions: TransactionLogHead::new(table_id, logs.partitions, None, config),
            table,
        }
    }

    /// Creates a state store whose logs and snapshots live on `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::InvalidConfig`] if the config is invalid.
    pub fn object_store(
        table: TableProperties,
        backend: Arc<dyn StorageBackend>,
        config: StateStoreConfig,
    ) -> Result<Self> {
        let storage = TableStorage::new(backend, table.table_id.clone());
        Self::new(table, TransactionLogs::object_store(&storage), config)
    }

    /// Returns the table this store manages.
    #[must_use]
    pub fn table(&self) -> &TableProperties {
        &self.table
    }

    /// Returns the table ID.
    #[must_use]
    pub fn table_id(&self) -> &TableId {
        &self.table.table_id
    }

    async fn commit_files(
        &self,
        operation: &'static str,
        transaction: FileReferenceTransaction,
    ) -> Result<u64> {
        self.files
            .add_transaction(transaction)
            .instrument(statestore_span(operation, self.table.table_id.as_str()))
            .await
    }

    // ------------------------------------------------------------------------
    // Partitions
    // ------------------------------------------------------------------------

    /// Initialises the table with a single root partition covering the whole
    /// key space.
    ///
    /// # Errors
    ///
    /// Fails if live file references exist, or the update fails.
    pub async fn initialise(&self) -> Result<()> {
        let tree = PartitionsBuilder::new(self.table.schema.clone()).single_partition();
        self.initialise_with_partitions(&tree).await
    }

    /// Initialises the table with the given partition tree, replacing any
    /// previous tree.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::FilesExistOnInitialise`] if live file
    /// references exist, or [`ValidationError::InvalidPartitionTree`] if the
    /// tree is malformed or does not match the table's schema.
    pub async fn initialise_with_partitions(&self, tree: &PartitionTree) -> Result<()> {
        let span = statestore_span("initialise", self.table.table_id.as_str());
        async {
            let reference_count = self.files.read(|files| files.reference_count()).await?;
            if reference_count > 0 {
                return Err(ValidationError::FilesExistOnInitialise { reference_count }.into());
            }
            let dimensions = self.table.schema.row_key_types.len();
            if let Some(bad) = tree.iter().find(|p| p.region.dimensions() != dimensions) {
                return Err(ValidationError::InvalidPartitionTree {
                    reason: format!(
                        "partition {} has {} dimensions, table has {dimensions}",
                        bad.id,
                        bad.region.dimensions()
                    ),
                }
                .into());
            }

            let transaction = PartitionTransaction::InitialisePartitions(
                InitialisePartitionsTransaction::new(tree),
            );
            self.partitions.add_transaction(transaction).await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Splits a leaf partition into two children.
    ///
    /// `parent` is the partition as it is after the split; see
    /// [`PartitionTree::split_leaf`] for building the three partitions.
    ///
    /// # Errors
    ///
    /// Fails if the parent is missing or already split, the children already
    /// exist, or the children do not divide the parent's region exactly.
    pub async fn split_partition(
        &self,
        parent: Partition,
        left: Partition,
        right: Partition,
    ) -> Result<()> {
        let transaction = PartitionTransaction::SplitPartition(SplitPartitionTransaction::new(
            parent, left, right,
        ));
        self.partitions
            .add_transaction(transaction)
            .instrument(statestore_span("split_partition", self.table.table_id.as_str()))
            .await?;
        Ok(())
    }

    /// Returns every partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_all_partitions(&self) -> Result<Vec<Partition>> {
        self.partitions.read(PartitionTree::all).await
    }

    /// Returns the leaf partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_leaf_partitions(&self) -> Result<Vec<Partition>> {
        self.partitions
            .read(|tree| tree.leaves().into_iter().cloned().collect())
            .await
    }

    /// Returns one partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_partition(&self, partition_id: &str) -> Result<Option<Partition>> {
        self.partitions
            .read(|tree| tree.get(partition_id).cloned())
            .await
    }

    /// Returns the whole partition tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_partition_tree(&self) -> Result<PartitionTree> {
        self.partitions.read(Clone::clone).await
    }

    // ------------------------------------------------------------------------
    // File references
    // ------------------------------------------------------------------------

    /// Adds one file reference.
    ///
    /// # Errors
    ///
    /// See [`add_files`](Self::add_files).
    pub async fn add_file(&self, reference: FileReference) -> Result<()> {
        self.add_files(vec![reference]).await
    }

    /// Adds references to newly written files.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::FileReferenceAlreadyExists`] if a
    /// reference for the same file and partition exists,
    /// [`ValidationError::FileAlreadyExists`] if the file is awaiting garbage
    /// collection, or [`ValidationError::PartitionNotFound`] if the table has
    /// partitions and a reference names one that does not exist.
    pub async fn add_files(&self, references: Vec<FileReference>) -> Result<()> {
        let missing = self
            .partitions
            .read(|tree| {
                if tree.is_empty() {
                    return None;
                }
                references
                    .iter()
                    .find(|r| tree.get(&r.partition_id).is_none())
                    .map(|r| r.partition_id.clone())
            })
            .await?;
        if let Some(partition_id) = missing {
            return Err(ValidationError::PartitionNotFound { partition_id }.into());
        }

        let transaction = FileReferenceTransaction::AddFiles(AddFilesTransaction::new(references));
        self.commit_files("add_files", transaction).await?;
        Ok(())
    }

    /// Claims files in one partition for a compaction job.
    ///
    /// # Errors
    ///
    /// See [`assign_job_ids`](Self::assign_job_ids).
    pub async fn assign_job_id(
        &self,
        job_id: &JobId,
        partition_id: &str,
        filenames: Vec<String>,
    ) -> Result<()> {
        self.assign_job_ids(vec![AssignJobIdRequest::new(
            job_id.clone(),
            partition_id,
            filenames,
        )])
        .await
    }

    /// Claims file references for compaction jobs, all or nothing.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::FileReferenceNotFound`] if a reference is
    /// missing, or [`ValidationError::FileReferenceAssignedToJob`] if one is
    /// held by a different job.
    pub async fn assign_job_ids(&self, requests: Vec<AssignJobIdRequest>) -> Result<()> {
        let transaction =
            FileReferenceTransaction::AssignJobIds(AssignJobIdsTransaction::new(requests));
        self.commit_files("assign_job_ids", transaction).await?;
        Ok(())
    }

    /// Commits a compaction job: removes its input references in
    /// `partition_id` and adds its output references, in one transaction.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::FileReferenceNotAssignedToJob`] if any
    /// input is not held by `job_id`, or if an output already exists.
    pub async fn atomically_replace_files_with_new_references(
        &self,
        job_id: &JobId,
        partition_id: &str,
        input_files: Vec<String>,
        new_references: Vec<FileReference>,
    ) -> Result<()> {
        let transaction = FileReferenceTransaction::ReplaceFileReferences(
            ReplaceFileReferencesTransaction::new(
                job_id.clone(),
                partition_id,
                input_files,
                new_references,
            ),
        );
        self.commit_files("replace_file_references", transaction)
            .await?;
        Ok(())
    }

    /// Moves references from split partitions onto their descendants.
    ///
    /// # Errors
    ///
    /// Fails if a reference is missing or claimed by a job, a new reference
    /// already exists, or a new reference's partition is not below the
    /// partition being split from.
    pub async fn split_file_references(
        &self,
        requests: Vec<SplitFileReferenceRequest>,
    ) -> Result<()> {
        let misrouted = self
            .partitions
            .read(|tree| {
                requests.iter().find_map(|request| {
                    request
                        .new_references
                        .iter()
                        .find(|r| {
                            !tree
                                .ancestors(&r.partition_id)
                                .iter()
                                .any(|a| a.id == request.from_partition_id)
                        })
                        .map(|r| (request, r.partition_id.clone()))
                        .map(|(request, target)| ValidationError::InvalidReferenceSplit {
                            filename: request.filename.clone(),
                            partition_id: request.from_partition_id.clone(),
                            reason: format!("partition {target} is not below it"),
                        })
                })
            })
            .await?;
        if let Some(err) = misrouted {
            return Err(err.into());
        }

        let transaction = FileReferenceTransaction::SplitFileReferences(
            SplitFileReferencesTransaction::new(requests),
        );
        self.commit_files("split_file_references", transaction)
            .await?;
        Ok(())
    }

    /// Removes every file reference. The files stay tracked with no
    /// references, so garbage collection deletes them.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn clear_file_data(&self) -> Result<()> {
        self.commit_files("clear_file_data", FileReferenceTransaction::ClearFiles)
            .await?;
        Ok(())
    }

    /// Removes every file reference and resets the partitions to a single root.
    ///
    /// # Errors
    ///
    /// Returns an error if either update fails.
    pub async fn clear_table(&self) -> Result<()> {
        self.clear_file_data().await?;
        self.initialise().await
    }

    /// Forgets files that garbage collection has physically deleted.
    ///
    /// Files that are no longer tracked are skipped, so this is safe to repeat.
    ///
    /// # Errors
    ///
    /// Fails with [`ValidationError::FileHasReferences`] if a file still has
    /// references.
    pub async fn delete_garbage_collected_files(&self, filenames: Vec<String>) -> Result<()> {
        if filenames.is_empty() {
            return Ok(());
        }
        let transaction =
            FileReferenceTransaction::DeleteFiles(DeleteFilesTransaction::new(filenames));
        self.commit_files("delete_files", transaction).await?;
        Ok(())
    }

    /// Returns every live file reference, ordered by filename then partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_all_file_references(&self) -> Result<Vec<FileReference>> {
        self.files
            .read(|files| files.references().cloned().collect())
            .await
    }

    /// Returns live references not claimed by any job.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_file_references_with_no_job_id(&self) -> Result<Vec<FileReference>> {
        self.files
            .read(|files| {
                files
                    .references()
                    .filter(|r| r.job_id.is_none())
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Returns, for each partition with live references, its referenced files.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_partition_to_referenced_files_map(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        self.files
            .read(|files| {
                let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for reference in files.references() {
                    map.entry(reference.partition_id.clone())
                        .or_default()
                        .push(reference.filename.clone());
                }
                map
            })
            .await
    }

    /// Returns up to `max` files with no references, flagging whether more exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_files_with_no_references(&self, max: usize) -> Result<UnreferencedFiles> {
        self.get_ready_for_gc_filenames_before(DateTime::<Utc>::MAX_UTC, max)
            .await
    }

    /// Returns up to `max` files whose last reference was removed before
    /// `cutoff`, flagging whether more exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn get_ready_for_gc_filenames_before(
        &self,
        cutoff: DateTime<Utc>,
        max: usize,
    ) -> Result<UnreferencedFiles> {
        self.files
            .read(|files| files.unreferenced_before(cutoff, max))
            .await
    }

    // ------------------------------------------------------------------------
    // Determinism and snapshots
    // ------------------------------------------------------------------------

    /// Stamps all following file transactions with `time`.
    pub fn fix_file_update_time(&self, time: DateTime<Utc>) {
        self.files.fix_update_time(time);
    }

    /// Returns the latest sequence numbers of the file and partition logs.
    ///
    /// # Errors
    ///
    /// Returns an error if a log cannot be read.
    pub async fn latest_sequence_numbers(&self) -> Result<(u64, u64)> {
        Ok((
            self.files.latest_sequence_number().await?,
            self.partitions.latest_sequence_number().await?,
        ))
    }

    /// Snapshots each log that has moved on enough since its last snapshot.
    ///
    /// Does nothing if the store has no snapshot storage.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot cannot be written.
    pub async fn create_snapshots(&self) -> Result<SnapshotsCreated> {
        let span = statestore_span("create_snapshots", self.table.table_id.as_str());
        async {
            Ok(SnapshotsCreated {
                files: self.files.create_snapshot().await?,
                partitions: self.partitions.create_snapshot().await?,
            })
        }
        .instrument(span)
        .await
    }
}
