//! Table-scoped storage with a fixed path layout.
//!
//! All paths are prefixed with `table={table_id}/`, so a backend shared by
//! many tables keeps each table's transaction logs and snapshots isolated.
//!
//! ```text
//! table={table_id}/
//! ├── transactions/
//! │   ├── files/00000000000000000001.json
//! │   └── partitions/00000000000000000001.json
//! └── snapshots/
//!     ├── files/latest.json
//!     └── files/00000000000000000042.json
//! ```
//!
//! Path traversal (`..`), absolute paths and control characters are rejected.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::id::TableId;
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Table-scoped storage wrapper.
#[derive(Clone)]
pub struct TableStorage {
    backend: Arc<dyn StorageBackend>,
    table_id: TableId,
}

impl std::fmt::Debug for TableStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStorage")
            .field("table_id", &self.table_id)
            .finish_non_exhaustive()
    }
}

impl TableStorage {
    /// Creates a new table-scoped storage wrapper.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, table_id: TableId) -> Self {
        Self { backend, table_id }
    }

    /// Returns the table ID.
    #[must_use]
    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    /// Returns the backend for unscoped operations.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn validate_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidInput("empty path".into()));
        }

        if path.starts_with('/') || path.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "absolute paths and backslashes not allowed: {path}"
            )));
        }

        if path.contains('\n') || path.contains('\r') || path.contains('\0') {
            return Err(Error::InvalidInput(format!(
                "control characters not allowed in paths: {path}"
            )));
        }

        for segment in path.split('/') {
            if segment == "." || segment == ".." {
                return Err(Error::InvalidInput(format!(
                    "path traversal not allowed: {path}"
                )));
            }
        }

        Ok(())
    }

    /// Returns the full backend path for a table-relative path.
    #[must_use]
    pub fn scoped_path(&self, path: &str) -> String {
        format!("{}{}", self.table_id.storage_prefix(), path)
    }

    /// Reads data at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the object is not found.
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        Self::validate_path(path)?;
        self.backend.get(&self.scoped_path(path)).await
    }

    /// Writes data at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        Self::validate_path(path)?;
        self.backend
            .put(&self.scoped_path(path), data, precondition)
            .await
    }

    /// Returns metadata for a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Self::validate_path(path)?;
        self.backend.head(&self.scoped_path(path)).await
    }

    /// Deletes data at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn delete(&self, path: &str) -> Result<()> {
        Self::validate_path(path)?;
        self.backend.delete(&self.scoped_path(path)).await
    }

    /// Lists objects under a table-relative prefix.
    ///
    /// Returned paths are table-relative.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or the backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Self::validate_path(prefix)?;
        let scope = self.table_id.storage_prefix();
        let mut entries = self.backend.list(&self.scoped_path(prefix)).await?;
        for meta in &mut entries {
            if let Some(relative) = meta.path.strip_prefix(&scope) {
                meta.path = relative.to_string();
            }
        }
        Ok(entries)
    }
}
