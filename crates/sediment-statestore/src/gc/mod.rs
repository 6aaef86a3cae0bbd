//! Garbage collection of unreferenced data files.
//!
//! A data file is only deleted once every reference to it is gone and a
//! minimum age has passed since the last one was removed. The protocol, per
//! table:
//!
//! 1. List unreferenced files older than the minimum age, capped at
//!    `max_files_per_table`.
//! 2. Delete each from the data store. Failures are recorded per file.
//! 3. Tell the state store to forget the files that were deleted, in batches.
//!    A failed batch is recorded as a state store update failure: the files
//!    are gone but still listed, and the next run forgets them.
//!
//! Deleting metadata for a file that is no longer tracked is a no-op, so runs
//! can be repeated safely.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sediment_statestore::gc::{GarbageCollector, GcConfig};
//!
//! let collector = GarbageCollector::new(tables, data_store, GcConfig::default())?;
//! let report = collector.run().await;
//! for failed in &report.failures {
//!     tracing::warn!(table = %failed.table_id, "GC failures");
//! }
//! ```

mod collector;
mod config;

pub use collector::{
    FileFailure, GarbageCollector, GcCandidates, GcReport, StateStoreUpdateFailure,
    TableDeletions, TableFailures,
};
pub use config::GcConfig;
