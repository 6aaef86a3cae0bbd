//! Snapshots of materialised log state.
//!
//! A snapshot stores the fold of a log up to some sequence number, so a new
//! state store instance can start there and replay only the entries after it.
//! Snapshots never replace the log.
//!
//! Layout, relative to the table:
//!
//! ```text
//! snapshots/{log}/{sequence:020}.json   snapshot body
//! snapshots/{log}/latest.json           pointer to the newest snapshot
//! ```
//!
//! The pointer carries the SHA-256 of the body it points at and only ever
//! moves forward. It is updated with compare-and-swap writes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sediment_core::{TableStorage, WritePrecondition, WriteResult};

use crate::error::{Result, StateStoreError};
use crate::transaction::LogKind;

const MAX_POINTER_CAS_RETRIES: u32 = 10;

/// Materialised state of a log at a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLogSnapshot<S> {
    /// Last sequence number folded into `state`.
    pub sequence_number: u64,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
    /// The state.
    pub state: S,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestSnapshot {
    sequence_number: u64,
    path: String,
    sha256: String,
    created_at: DateTime<Utc>,
}

/// Reads and writes log snapshots for one table.
#[derive(Debug, Clone)]
pub struct TransactionLogSnapshotStore {
    storage: TableStorage,
}

impl TransactionLogSnapshotStore {
    /// Creates a snapshot store over the table's storage.
    #[must_use]
    pub fn new(storage: TableStorage) -> Self {
        Self { storage }
    }

    fn snapshot_path(log: LogKind, sequence_number: u64) -> String {
        format!("snapshots/{log}/{sequence_number:020}.json")
    }

    fn latest_path(log: LogKind) -> String {
        format!("snapshots/{log}/latest.json")
    }

    /// Writes a snapshot and advances the latest pointer to it.
    ///
    /// Returns `false` if an equal or newer snapshot was already the latest.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the pointer keeps changing under
    /// concurrent writers.
    pub async fn save<S: Serialize + Sync>(
        &self,
        log: LogKind,
        sequence_number: u64,
        state: &S,
    ) -> Result<bool> {
        let snapshot = TransactionLogSnapshot {
            sequence_number,
            created_at: Utc::now(),
            state,
        };
        let path = Self::snapshot_path(log, sequence_number);
        let body = serde_json::to_vec(&snapshot)
            .map_err(|e| sediment_core::Error::serialization(&path, e))?;
        let mut sha256 = hex::encode(Sha256::digest(&body));

        // two writers may snapshot the same sequence number; the bodies hold
        // the same state, so an existing body is kept and its checksum used
        let written = self
            .storage
            .put(&path, Bytes::from(body), WritePrecondition::DoesNotExist)
            .await?;
        if !written.is_success() {
            let existing = self.storage.get(&path).await?;
            sha256 = hex::encode(Sha256::digest(&existing));
        }

        let pointer = LatestSnapshot {
            sequence_number,
            path: path.clone(),
            sha256,
            created_at: snapshot.created_at,
        };
        let latest_path = Self::latest_path(log);
        let pointer_bytes = Bytes::from(
            serde_json::to_vec(&pointer)
                .map_err(|e| sediment_core::Error::serialization(&latest_path, e))?,
        );

        for _ in 0..MAX_POINTER_CAS_RETRIES {
            let precondition = match self.read_pointer(log).await? {
                Some((current, _)) if current.sequence_number >= sequence_number => {
                    return Ok(false);
                }
                Some((_, version)) => WritePrecondition::MatchesVersion(version),
                None => WritePrecondition::DoesNotExist,
            };
            match self
                .storage
                .put(&latest_path, pointer_bytes.clone(), precondition)
                .await?
            {
                WriteResult::Success { .. } => {
                    tracing::info!(
                        table = %self.storage.table_id(),
                        log = %log,
                        sequence_number,
                        "saved transaction log snapshot"
                    );
                    return Ok(true);
                }
                WriteResult::PreconditionFailed { .. } => {
                    tracing::debug!(log = %log, sequence_number, "snapshot pointer moved, retrying");
                }
            }
        }

        Err(StateStoreError::Snapshot {
            message: format!(
                "latest {log} snapshot pointer kept changing after {MAX_POINTER_CAS_RETRIES} attempts"
            ),
        })
    }

    /// Loads the latest snapshot, verifying its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Snapshot`] if the body does not match the
    /// pointer, or a storage error.
    pub async fn load_latest<S: DeserializeOwned>(
        &self,
        log: LogKind,
    ) -> Result<Option<TransactionLogSnapshot<S>>> {
        let Some((pointer, _)) = self.read_pointer(log).await? else {
            return Ok(None);
        };
        let body = self.storage.get(&pointer.path).await?;
        let actual = hex::encode(Sha256::digest(&body));
        if actual != pointer.sha256 {
            return Err(StateStoreError::Snapshot {
                message: format!(
                    "checksum mismatch for {}: expected {}, found {actual}",
                    pointer.path, pointer.sha256
                ),
            });
        }
        let snapshot: TransactionLogSnapshot<S> = serde_json::from_slice(&body)
            .map_err(|e| sediment_core::Error::serialization(&pointer.path, e))?;
        if snapshot.sequence_number != pointer.sequence_number {
            return Err(StateStoreError::Snapshot {
                message: format!(
                    "{} holds sequence number {}, pointer says {}",
                    pointer.path, snapshot.sequence_number, pointer.sequence_number
                ),
            });
        }
        Ok(Some(snapshot))
    }

    /// Returns the sequence number of the latest snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn latest_sequence_number(&self, log: LogKind) -> Result<Option<u64>> {
        Ok(self
            .read_pointer(log)
            .await?
            .map(|(pointer, _)| pointer.sequence_number))
    }

    async fn read_pointer(&self, log: LogKind) -> Result<Option<(LatestSnapshot, String)>> {
        let path = Self::latest_path(log);
        let Some(meta) = self.storage.head(&path).await? else {
            return Ok(None);
        };
        let data = match self.storage.get(&path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pointer: LatestSnapshot = serde_json::from_slice(&data)
            .map_err(|e| sediment_core::Error::serialization(&path, e))?;
        Ok(Some((pointer, meta.version)))
    }
}
