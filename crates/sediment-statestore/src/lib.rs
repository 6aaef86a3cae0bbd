//! # sediment-statestore
//!
//! Transactional metadata store for Sediment tables.
//!
//! A table's data lives in immutable files. This crate tracks which files
//! exist, which partitions reference them, which compaction job holds them,
//! and which are safe to delete:
//!
//! - **Transaction logs**: two append-only, gapless logs per table, one for
//!   file references and one for the partition tree
//! - **Transactions**: validated commands folded into the materialised state
//! - **State store**: optimistic concurrency over the logs, with re-validation
//!   and bounded retry when writers race
//! - **Garbage collection**: deletes files once their reference count is zero
//!   and they have aged past a safety window
//! - **Job status**: lifecycle of ingest and compaction jobs
//!
//! ## Storage Layout
//!
//! ```text
//! table={table_id}/
//! ├── transactions/
//! │   ├── files/{sequence:020}.json
//! │   └── partitions/{sequence:020}.json
//! └── snapshots/
//!     ├── files/{sequence:020}.json, latest.json
//!     └── partitions/{sequence:020}.json, latest.json
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sediment_core::TableId;
//! use sediment_statestore::model::{FileReference, RowKeyType, TableSchema, ROOT_PARTITION_ID};
//! use sediment_statestore::{StateStore, TableProperties};
//!
//! # tokio_test::block_on(async {
//! let table = TableProperties::new(
//!     TableId::new("events").unwrap(),
//!     TableSchema::single_key(RowKeyType::Long),
//! );
//! let store = StateStore::in_memory(table);
//! store.initialise().await.unwrap();
//! store
//!     .add_file(FileReference::ingested("part-0001.parquet", ROOT_PARTITION_ID, 1000))
//!     .await
//!     .unwrap();
//! assert_eq!(store.get_all_file_references().await.unwrap().len(), 1);
//! # });
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod commit;
pub mod config;
pub mod error;
pub mod gc;
mod head;
pub mod job_status;
pub mod log;
pub mod metrics;
pub mod model;
mod retry;
pub mod snapshot;
pub mod state_store;
pub mod transaction;

// Re-export main types at crate root
pub use config::StateStoreConfig;
pub use error::{JobStatusError, Result, StateStoreError, TransactionLogError, ValidationError};
pub use gc::{GarbageCollector, GcConfig, GcReport};
pub use job_status::{InMemoryJobStatusStore, JobStatus, JobStatusStore, JobStatusUpdate};
pub use log::{
    InMemoryTransactionLogStore, ObjectTransactionLogStore, TransactionLogEntry,
    TransactionLogStore,
};
pub use model::{FileReference, Partition, PartitionTree, TableProperties};
pub use snapshot::TransactionLogSnapshotStore;
pub use state_store::{SnapshotsCreated, StateStore, TransactionLogs};
pub use transaction::{FileReferenceTransaction, PartitionTransaction, StateTransaction};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::StateStoreConfig;
    pub use crate::error::{StateStoreError, ValidationError};
    pub use crate::model::{
        FileReference, KeyValue, Partition, PartitionTree, PartitionsBuilder, RowKeyType,
        TableProperties, TableSchema, ROOT_PARTITION_ID,
    };
    pub use crate::state_store::StateStore;
}
