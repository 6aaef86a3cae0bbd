//! In-memory transaction log.

use std::sync::RwLock;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use super::{check_next_number, TransactionLogEntry, TransactionLogStore};
use crate::error::TransactionLogError;
use crate::transaction::StateTransaction;

/// Transaction log held in process memory.
///
/// Shared between state store instances through an `Arc`, it behaves like a
/// durable log with concurrent writers.
#[derive(Debug)]
pub struct InMemoryTransactionLogStore<T> {
    entries: RwLock<Vec<TransactionLogEntry<T>>>,
}

impl<T> Default for InMemoryTransactionLogStore<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<T: StateTransaction> InMemoryTransactionLogStore<T> {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize, TransactionLogError> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }

    /// Returns true if the log has no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, TransactionLogError> {
        Ok(self.len()? == 0)
    }
}

fn poisoned() -> TransactionLogError {
    TransactionLogError::Storage(sediment_core::Error::Internal {
        message: "transaction log lock poisoned".into(),
    })
}

#[async_trait]
impl<T: StateTransaction> TransactionLogStore<T> for InMemoryTransactionLogStore<T> {
    async fn add_transaction(
        &self,
        entry: &TransactionLogEntry<T>,
    ) -> Result<(), TransactionLogError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let latest = entries.last().map_or(0, |e| e.sequence_number);
        check_next_number(T::LOG, latest, entry.sequence_number)?;
        entries.push(entry.clone());
        Ok(())
    }

    fn read_transactions_after(
        &self,
        sequence_number: u64,
    ) -> BoxStream<'_, Result<TransactionLogEntry<T>, TransactionLogError>> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(_) => return stream::iter([Err(poisoned())]).boxed(),
        };
        // sequence numbers are 1-based and gapless, so entry n is at index n - 1
        let start = usize::try_from(sequence_number)
            .unwrap_or(usize::MAX)
            .min(entries.len());
        let tail: Vec<_> = entries[start..].iter().cloned().map(Ok).collect();
        drop(entries);
        stream::iter(tail).boxed()
    }
}
