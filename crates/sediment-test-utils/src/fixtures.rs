//! Pre-built test fixtures for common test scenarios.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use sediment_core::{StorageBackend, TableId};
use sediment_statestore::model::{FileReference, RowKeyType, TableSchema};
use sediment_statestore::{StateStore, StateStoreConfig, TableProperties, TransactionLogs};

use crate::storage::TracingMemoryBackend;

/// Test context with shared storage and a table.
///
/// State stores created from one context are separate instances over the
/// same logs, like processes on different machines.
pub struct TestContext {
    /// Storage for transaction logs and snapshots.
    pub storage: Arc<TracingMemoryBackend>,
    /// The table.
    pub table: TableProperties,
    /// Config for state stores created by this context.
    pub config: StateStoreConfig,
}

impl TestContext {
    /// Creates a context with a unique table keyed on one long column.
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(TableId::generate())
    }

    /// Creates a context for a specific table.
    #[must_use]
    pub fn with_table(table_id: TableId) -> Self {
        Self {
            storage: Arc::new(TracingMemoryBackend::new()),
            table: TableProperties::new(table_id, TableSchema::single_key(RowKeyType::Long)),
            config: StateStoreConfig::testing(),
        }
    }

    /// Creates a new state store instance over the context's storage.
    #[must_use]
    pub fn state_store(&self) -> StateStore {
        let backend: Arc<dyn StorageBackend> = self.storage.clone();
        StateStore::object_store(self.table.clone(), backend, self.config.clone())
            .expect("valid test config")
    }

    /// Creates a new state store instance over the given logs.
    #[must_use]
    pub fn state_store_with_logs(&self, logs: TransactionLogs) -> StateStore {
        StateStore::new(self.table.clone(), logs, self.config.clone()).expect("valid test config")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns an initialised in-memory state store for a table keyed on one long column.
pub async fn initialised_store(table: &str) -> StateStore {
    let store = StateStore::in_memory(TableProperties::new(
        TableId::new(table).expect("valid table id"),
        TableSchema::single_key(RowKeyType::Long),
    ));
    store.initialise().await.expect("initialise");
    store
}

/// Returns a fixed time `offset_secs` after a fixed epoch.
#[must_use]
pub fn fixed_time(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
        + Duration::seconds(offset_secs)
}

/// Factory for file references with predictable names.
pub struct FileFactory;

impl FileFactory {
    /// Creates `count` ingested references on one partition, named
    /// `{prefix}-{index:04}.parquet`.
    #[must_use]
    pub fn ingested(prefix: &str, partition_id: &str, count: usize) -> Vec<FileReference> {
        (0..count)
            .map(|i| FileReference::ingested(Self::filename(prefix, i), partition_id, 100))
            .collect()
    }

    /// Returns the name the factory gives the `index`th file with `prefix`.
    #[must_use]
    pub fn filename(prefix: &str, index: usize) -> String {
        format!("{prefix}-{index:04}.parquet")
    }

    /// Returns the filenames of references.
    #[must_use]
    pub fn filenames(references: &[FileReference]) -> Vec<String> {
        references.iter().map(|r| r.filename.clone()).collect()
    }
}
