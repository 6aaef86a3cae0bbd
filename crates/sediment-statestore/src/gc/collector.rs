//! Garbage collector implementation.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use ulid::Ulid;

use sediment_core::observability::gc_span;
use sediment_core::{StorageBackend, TableId};

use crate::error::{Result, StateStoreError};
use crate::gc::GcConfig;
use crate::state_store::StateStore;

/// A file that could not be deleted from the data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    /// The file.
    pub filename: String,
    /// What went wrong.
    pub error: String,
}

/// Files deleted from the data store whose metadata could not be removed.
///
/// The files are gone but the state store still lists them as unreferenced.
/// A later run retries the metadata removal; the physical delete is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStoreUpdateFailure {
    /// Files in the failed delete transaction.
    pub filenames: Vec<String>,
    /// What went wrong.
    pub error: String,
}

/// Everything that went wrong while collecting one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFailures {
    /// The table.
    pub table_id: TableId,
    /// The table's unreferenced files could not be listed.
    pub listing_error: Option<String>,
    /// Per-file delete failures.
    pub file_failures: Vec<FileFailure>,
    /// Failed delete transactions.
    pub state_store_update_failures: Vec<StateStoreUpdateFailure>,
}

impl TableFailures {
    fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            listing_error: None,
            file_failures: Vec::new(),
            state_store_update_failures: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.listing_error.is_none()
            && self.file_failures.is_empty()
            && self.state_store_update_failures.is_empty()
    }
}

/// Files deleted from one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDeletions {
    /// The table.
    pub table_id: TableId,
    /// Files deleted and forgotten by the state store.
    pub deleted: Vec<String>,
    /// More files were ready than this run collected.
    pub more_than_max: bool,
}

/// Outcome of a garbage collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcReport {
    /// ID of the run, as it appears in logs.
    pub run_id: String,
    /// Deletions, one entry per table.
    pub tables: Vec<TableDeletions>,
    /// Tables with any failure.
    pub failures: Vec<TableFailures>,
}

impl GcReport {
    /// Total files deleted and forgotten.
    #[must_use]
    pub fn files_deleted(&self) -> usize {
        self.tables.iter().map(|t| t.deleted.len()).sum()
    }

    /// Returns true if any table had a failure.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Files a run would collect from one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcCandidates {
    /// The table.
    pub table_id: TableId,
    /// Files old enough to delete.
    pub filenames: Vec<String>,
    /// More files were ready than listed.
    pub more_than_max: bool,
}

/// Deletes data files that no longer have references.
///
/// For each table, the collector lists files that have had no references for
/// at least the configured age, deletes them from the data store one at a
/// time, then tells the state store to forget the ones it deleted. Failures
/// are collected in the report; one bad file or table never stops the rest.
///
/// # Example
///
/// ```rust,ignore
/// let collector = GarbageCollector::new(tables, data_store, GcConfig::default())?;
///
/// // Dry run first
/// let candidates = collector.collect_dry_run().await?;
///
/// // Actually collect
/// let report = collector.run().await;
/// ```
pub struct GarbageCollector {
    tables: Vec<Arc<StateStore>>,
    data_store: Arc<dyn StorageBackend>,
    config: GcConfig,
}

impl GarbageCollector {
    /// Creates a collector over the given tables.
    ///
    /// Filenames in the state stores are paths in `data_store`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::InvalidConfig`] if the config is invalid.
    pub fn new(
        tables: Vec<Arc<StateStore>>,
        data_store: Arc<dyn StorageBackend>,
        config: GcConfig,
    ) -> Result<Self> {
        if let Some(message) = config.validate() {
            return Err(StateStoreError::InvalidConfig { message });
        }
        Ok(Self {
            tables,
            data_store,
            config,
        })
    }

    /// Lists what a run now would delete, without deleting anything.
    ///
    /// # Errors
    ///
    /// Returns an error if any table's files cannot be listed.
    pub async fn collect_dry_run(&self) -> Result<Vec<GcCandidates>> {
        self.collect_dry_run_at(Utc::now()).await
    }

    /// Lists what a run at `now` would delete, without deleting anything.
    ///
    /// # Errors
    ///
    /// Returns an error if any table's files cannot be listed.
    pub async fn collect_dry_run_at(&self, now: DateTime<Utc>) -> Result<Vec<GcCandidates>> {
        let cutoff = self.cutoff(now);
        let mut candidates = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let ready = table
                .get_ready_for_gc_filenames_before(cutoff, self.config.max_files_per_table)
                .await?;
            candidates.push(GcCandidates {
                table_id: table.table_id().clone(),
                filenames: ready.filenames,
                more_than_max: ready.more_than_max,
            });
        }
        Ok(candidates)
    }

    /// Latest update time a file may have and still be collected at `now`.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.config.min_unreferenced_age())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Runs garbage collection now.
    pub async fn run(&self) -> GcReport {
        self.run_at(Utc::now()).await
    }

    /// Runs garbage collection as if the time were `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> GcReport {
        let run_id = Ulid::new().to_string();
        let span = gc_span(&run_id);
        self.run_tables(run_id, now).instrument(span).await
    }

    async fn run_tables(&self, run_id: String, now: DateTime<Utc>) -> GcReport {
        let start = Instant::now();
        let cutoff = self.cutoff(now);
        tracing::info!(
            tables = self.tables.len(),
            cutoff = %cutoff,
            max_files_per_table = self.config.max_files_per_table,
            "starting garbage collection"
        );

        let mut report = GcReport {
            run_id,
            tables: Vec::new(),
            failures: Vec::new(),
        };
        for table in &self.tables {
            let (deletions, failures) = self.collect_table(table, cutoff).await;
            crate::metrics::record_gc_table(
                table.table_id().as_str(),
                u64::try_from(deletions.deleted.len()).unwrap_or(u64::MAX),
                u64::try_from(failures.file_failures.len()).unwrap_or(u64::MAX),
                u64::try_from(failures.state_store_update_failures.len()).unwrap_or(u64::MAX),
            );
            report.tables.push(deletions);
            if !failures.is_empty() {
                report.failures.push(failures);
            }
        }

        let duration_secs = start.elapsed().as_secs_f64();
        crate::metrics::record_gc_run(duration_secs);
        tracing::info!(
            files_deleted = report.files_deleted(),
            tables_failed = report.failures.len(),
            duration_secs,
            "garbage collection completed"
        );
        report
    }

    async fn collect_table(
        &self,
        table: &StateStore,
        cutoff: DateTime<Utc>,
    ) -> (TableDeletions, TableFailures) {
        let table_id = table.table_id().clone();
        let mut deletions = TableDeletions {
            table_id: table_id.clone(),
            deleted: Vec::new(),
            more_than_max: false,
        };
        let mut failures = TableFailures::new(table_id);

        let ready = match table
            .get_ready_for_gc_filenames_before(cutoff, self.config.max_files_per_table)
            .await
        {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(table = %table.table_id(), error = %e, "failed to list unreferenced files");
                failures.listing_error = Some(e.to_string());
                return (deletions, failures);
            }
        };
        deletions.more_than_max = ready.more_than_max;
        if ready.more_than_max {
            tracing::info!(
                table = %table.table_id(),
                max = self.config.max_files_per_table,
                "more files ready than one run collects"
            );
        }

        for batch in ready.filenames.chunks(self.config.delete_batch_size) {
            let mut deleted = Vec::with_capacity(batch.len());
            for filename in batch {
                match self.data_store.delete(filename).await {
                    Ok(()) => deleted.push(filename.clone()),
                    Err(e) => {
                        tracing::warn!(table = %table.table_id(), filename = %filename, error = %e, "failed to delete file");
                        failures.file_failures.push(FileFailure {
                            filename: filename.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            if deleted.is_empty() {
                continue;
            }

            match table.delete_garbage_collected_files(deleted.clone()).await {
                Ok(()) => {
                    tracing::debug!(table = %table.table_id(), count = deleted.len(), "forgot deleted files");
                    deletions.deleted.extend(deleted);
                }
                Err(e) => {
                    tracing::error!(
                        table = %table.table_id(),
                        count = deleted.len(),
                        error = %e,
                        "deleted files but failed to update state store"
                    );
                    failures
                        .state_store_update_failures
                        .push(StateStoreUpdateFailure {
                            filenames: deleted,
                            error: e.to_string(),
                        });
                }
            }
        }

        (deletions, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use chrono::Duration;
    use sediment_core::{JobId, MemoryBackend, WritePrecondition};

    use crate::model::{FileReference, RowKeyType, TableProperties, TableSchema, ROOT_PARTITION_ID};

    fn time(offset_mins: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(offset_mins)
    }

    async fn table_with_files(
        name: &str,
        data: &MemoryBackend,
        files: &[&str],
    ) -> Arc<StateStore> {
        let store = StateStore::in_memory(TableProperties::new(
            TableId::new(name).unwrap(),
            TableSchema::single_key(RowKeyType::Long),
        ));
        store.initialise().await.unwrap();
        store.fix_file_update_time(time(0));
        let references = files
            .iter()
            .map(|f| FileReference::ingested(*f, ROOT_PARTITION_ID, 10))
            .collect();
        store.add_files(references).await.unwrap();
        for f in files {
            data.put(f, Bytes::from_static(b"data"), WritePrecondition::None)
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    async fn compact_all(store: &StateStore, inputs: &[&str], output: &str, at: DateTime<Utc>) {
        let job = JobId::new(format!("compact-{output}"));
        let inputs: Vec<String> = inputs.iter().map(ToString::to_string).collect();
        store.fix_file_update_time(at);
        store
            .assign_job_id(&job, ROOT_PARTITION_ID, inputs.clone())
            .await
            .unwrap();
        store
            .atomically_replace_files_with_new_references(
                &job,
                ROOT_PARTITION_ID,
                inputs,
                vec![FileReference::compacted(output, ROOT_PARTITION_ID, 20)],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deletes_unreferenced_files() {
        let data = MemoryBackend::new();
        let table = table_with_files("events", &data, &["a", "b"]).await;
        compact_all(&table, &["a", "b"], "c", time(0)).await;

        let collector = GarbageCollector::new(
            vec![table.clone()],
            Arc::new(data.clone()),
            GcConfig::testing(),
        )
        .unwrap();
        let report = collector.run_at(time(1)).await;

        assert!(!report.has_failures());
        assert_eq!(report.files_deleted(), 2);
        assert_eq!(report.tables[0].deleted, vec!["a", "b"]);
        assert!(data.head("a").await.unwrap().is_none());
        assert!(data.head("b").await.unwrap().is_none());
        assert!(table
            .get_files_with_no_references(10)
            .await
            .unwrap()
            .filenames
            .is_empty());
    }

    #[tokio::test]
    async fn test_recently_unreferenced_files_are_kept() {
        let data = MemoryBackend::new();
        let table = table_with_files("events", &data, &["a"]).await;
        compact_all(&table, &["a"], "b", time(0)).await;

        let config = GcConfig {
            min_unreferenced_age_minutes: 10,
            ..GcConfig::testing()
        };
        let collector =
            GarbageCollector::new(vec![table.clone()], Arc::new(data.clone()), config).unwrap();

        assert_eq!(collector.run_at(time(5)).await.files_deleted(), 0);
        assert!(data.head("a").await.unwrap().is_some());

        assert_eq!(collector.run_at(time(11)).await.files_deleted(), 1);
        assert!(data.head("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_earliest_time_collects_nothing() {
        let data = MemoryBackend::new();
        let table = table_with_files("events", &data, &["a"]).await;
        compact_all(&table, &["a"], "b", time(0)).await;

        let config = GcConfig {
            min_unreferenced_age_minutes: 10,
            ..GcConfig::testing()
        };
        let collector =
            GarbageCollector::new(vec![table.clone()], Arc::new(data.clone()), config).unwrap();

        let candidates = collector
            .collect_dry_run_at(DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap();
        assert!(candidates[0].filenames.is_empty());
        assert_eq!(collector.run_at(DateTime::<Utc>::MIN_UTC).await.files_deleted(), 0);
        assert!(data.head("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let data = MemoryBackend::new();
        let table = table_with_files("events", &data, &["a", "b"]).await;
        compact_all(&table, &["a"], "c", time(0)).await;

        let collector =
            GarbageCollector::new(vec![table.clone()], Arc::new(data.clone()), GcConfig::testing())
                .unwrap();
        let candidates = collector.collect_dry_run_at(time(1)).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].filenames, vec!["a"]);
        assert!(data.head("a").await.unwrap().is_some());
        assert_eq!(
            table.get_files_with_no_references(10).await.unwrap().filenames,
            vec!["a"]
        );
    }

    #[tokio::test]
    async fn test_runs_over_several_tables_in_batches() {
        let data = MemoryBackend::new();
        let names: Vec<String> = (0..25).map(|i| format!("f{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let first = table_with_files("first", &data, &refs).await;
        compact_all(&first, &refs, "first-out", time(0)).await;
        let second = table_with_files("second", &data, &["s1"]).await;
        compact_all(&second, &["s1"], "second-out", time(0)).await;

        let collector = GarbageCollector::new(
            vec![first.clone(), second.clone()],
            Arc::new(data.clone()),
            GcConfig::testing(),
        )
        .unwrap();
        let report = collector.run_at(time(1)).await;

        assert_eq!(report.tables.len(), 2);
        assert_eq!(report.tables[0].deleted.len(), 25);
        assert_eq!(report.tables[1].deleted, vec!["s1"]);
        // 25 files with a batch size of 10 is three delete transactions
        let (files_seq, _) = first.latest_sequence_numbers().await.unwrap();
        assert_eq!(files_seq, 3 + 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = GcConfig {
            max_files_per_table: 0,
            ..GcConfig::testing()
        };
        let result = GarbageCollector::new(Vec::new(), Arc::new(MemoryBackend::new()), config);
        assert!(matches!(result, Err(StateStoreError::InvalidConfig { .. })));
    }
}
