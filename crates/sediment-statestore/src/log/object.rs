//! Transaction log stored as one object per entry.
//!
//! Entry `n` lives at `transactions/{log}/{n:020}.json` under the table's
//! prefix. Appends use create-if-absent writes, so two writers racing for the
//! same number cannot both succeed; the loser sees a duplicate number.

use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use sediment_core::{TableStorage, WritePrecondition, WriteResult};

use super::{check_next_number, TransactionLogEntry, TransactionLogStore};
use crate::error::TransactionLogError;
use crate::transaction::StateTransaction;

/// Transaction log on object storage.
pub struct ObjectTransactionLogStore<T> {
    storage: TableStorage,
    _transaction: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for ObjectTransactionLogStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTransactionLogStore")
            .field("storage", &self.storage)
            .finish()
    }
}

impl<T: StateTransaction> ObjectTransactionLogStore<T> {
    /// Creates a log store for the table behind `storage`.
    #[must_use]
    pub fn new(storage: TableStorage) -> Self {
        Self {
            storage,
            _transaction: PhantomData,
        }
    }

    fn prefix() -> String {
        format!("transactions/{}/", T::LOG)
    }

    fn entry_path(sequence_number: u64) -> String {
        format!("{}{sequence_number:020}.json", Self::prefix())
    }

    /// Lists entry paths with sequence numbers above `after`, ascending.
    async fn entry_paths_after(
        &self,
        after: u64,
    ) -> Result<Vec<(u64, String)>, TransactionLogError> {
        let prefix = Self::prefix();
        let mut entries = Vec::new();
        for meta in self.storage.list(&prefix).await? {
            let number = meta
                .path
                .strip_prefix(&prefix)
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u64>().ok())
                .ok_or_else(|| TransactionLogError::CorruptEntry {
                    log: T::LOG,
                    message: format!("unexpected object in log: {}", meta.path),
                })?;
            if number > after {
                entries.push((number, meta.path));
            }
        }
        entries.sort_unstable_by_key(|(number, _)| *number);
        Ok(entries)
    }

    async fn latest_sequence_number(&self) -> Result<u64, TransactionLogError> {
        Ok(self
            .entry_paths_after(0)
            .await?
            .last()
            .map_or(0, |(number, _)| *number))
    }

    async fn read_entry(
        &self,
        number: u64,
        path: String,
    ) -> Result<TransactionLogEntry<T>, TransactionLogError> {
        let data = self.storage.get(&path).await?;
        let entry: TransactionLogEntry<T> = serde_json::from_slice(&data).map_err(|e| {
            TransactionLogError::Storage(sediment_core::Error::serialization(&path, e))
        })?;
        if entry.sequence_number != number {
            return Err(TransactionLogError::CorruptEntry {
                log: T::LOG,
                message: format!(
                    "{path} holds sequence number {}",
                    entry.sequence_number
                ),
            });
        }
        Ok(entry)
    }
}

#[async_trait]
impl<T: StateTransaction> TransactionLogStore<T> for ObjectTransactionLogStore<T> {
    async fn add_transaction(
        &self,
        entry: &TransactionLogEntry<T>,
    ) -> Result<(), TransactionLogError> {
        let number = entry.sequence_number;
        if number == 0 {
            return Err(TransactionLogError::DuplicateTransactionNumber { log: T::LOG, number });
        }
        if number > 1
            && self
                .storage
                .head(&Self::entry_path(number - 1))
                .await?
                .is_none()
        {
            let latest = self.latest_sequence_number().await?;
            check_next_number(T::LOG, latest, number)?;
        }

        let path = Self::entry_path(number);
        let data = serde_json::to_vec(entry)
            .map_err(|e| TransactionLogError::Storage(sediment_core::Error::serialization(&path, e)))?;
        match self
            .storage
            .put(&path, Bytes::from(data), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => {
                Err(TransactionLogError::DuplicateTransactionNumber { log: T::LOG, number })
            }
        }
    }

    fn read_transactions_after(
        &self,
        sequence_number: u64,
    ) -> BoxStream<'_, Result<TransactionLogEntry<T>, TransactionLogError>> {
        stream::once(self.entry_paths_after(sequence_number))
            .map_ok(|paths| stream::iter(paths).map(Ok::<_, TransactionLogError>))
            .try_flatten()
            .and_then(move |(number, path)| self.read_entry(number, path))
            .boxed()
    }
}
