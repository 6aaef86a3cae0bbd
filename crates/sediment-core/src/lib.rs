//! # sediment-core
//!
//! Shared primitives for the Sediment partitioned table storage engine.
//!
//! - **Storage contract**: conditional-write object storage ([`StorageBackend`])
//!   and an in-memory implementation
//! - **Table scoping**: [`TableStorage`] keeps each table under its own prefix
//! - **Identifiers**: [`TableId`], [`JobId`]
//! - **Error types**: shared [`Error`] and [`Result`]
//! - **Observability**: logging initialisation and span helpers
//! - **Polling**: fixed-interval wait with timeout ([`PollConfig`])
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sediment_core::prelude::*;
//!
//! let table = TableId::new("events").unwrap();
//! let storage = TableStorage::new(Arc::new(MemoryBackend::new()), table);
//! assert_eq!(storage.scoped_path("x.json"), "table=events/x.json");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod poll;
pub mod storage;
pub mod table_storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{JobId, TableId};
    pub use crate::poll::PollConfig;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
    pub use crate::table_storage::TableStorage;
}

pub use error::{Error, Result};
pub use id::{JobId, TableId};
pub use observability::{init_logging, LogFormat};
pub use poll::PollConfig;
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
pub use table_storage::TableStorage;
