//! Append-only transaction logs.
//!
//! A log store guarantees strict, gapless, conflict-detected ordering and knows
//! nothing about what the transactions mean:
//!
//! - appending sequence number `n` succeeds only if the latest entry is `n - 1`
//! - `n` at or below the latest entry fails with
//!   [`TransactionLogError::DuplicateTransactionNumber`] (another writer won)
//! - `n` above `latest + 1` fails with
//!   [`TransactionLogError::TransactionNumberTooHigh`]
//!
//! Neither failure changes the log.

mod memory;
mod object;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::TransactionLogError;
use crate::transaction::StateTransaction;

pub use memory::InMemoryTransactionLogStore;
pub use object::ObjectTransactionLogStore;

/// One committed transaction. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLogEntry<T> {
    /// Position in the log, starting at 1.
    pub sequence_number: u64,
    /// Time the transaction was committed. Replay stamps changes with it.
    pub applied_at: DateTime<Utc>,
    /// The transaction.
    pub transaction: T,
}

impl<T> TransactionLogEntry<T> {
    /// Creates an entry.
    #[must_use]
    pub const fn new(sequence_number: u64, applied_at: DateTime<Utc>, transaction: T) -> Self {
        Self {
            sequence_number,
            applied_at,
            transaction,
        }
    }
}

/// Durable storage for one transaction log.
#[async_trait]
pub trait TransactionLogStore<T: StateTransaction>: Send + Sync {
    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionLogError::DuplicateTransactionNumber`] if the
    /// sequence number is taken, or
    /// [`TransactionLogError::TransactionNumberTooHigh`] if it would leave a gap.
    async fn add_transaction(
        &self,
        entry: &TransactionLogEntry<T>,
    ) -> Result<(), TransactionLogError>;

    /// Streams entries with sequence numbers above `sequence_number`, in
    /// ascending order. Each call starts a fresh read.
    fn read_transactions_after(
        &self,
        sequence_number: u64,
    ) -> BoxStream<'_, Result<TransactionLogEntry<T>, TransactionLogError>>;
}

/// Checks a proposed sequence number against the latest one in the log.
pub(crate) fn check_next_number(
    log: crate::transaction::LogKind,
    latest: u64,
    number: u64,
) -> Result<(), TransactionLogError> {
    if number <= latest {
        return Err(TransactionLogError::DuplicateTransactionNumber { log, number });
    }
    if number > latest + 1 {
        return Err(TransactionLogError::TransactionNumberTooHigh {
            log,
            number,
            expected: latest + 1,
        });
    }
    Ok(())
}
