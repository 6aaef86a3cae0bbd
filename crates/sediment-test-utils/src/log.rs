//! Transaction log wrappers that simulate racing writers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use sediment_statestore::log::{TransactionLogEntry, TransactionLogStore};
use sediment_statestore::transaction::StateTransaction;
use sediment_statestore::TransactionLogError;

/// Wraps a log store and reports append conflicts without writing.
///
/// Each injected conflict looks to the caller like another writer took the
/// sequence number, but nothing is appended, so a retry with the same number
/// succeeds.
pub struct ConflictingLogStore<T: StateTransaction> {
    inner: Arc<dyn TransactionLogStore<T>>,
    conflicts_remaining: AtomicU32,
    add_attempts: AtomicU32,
}

impl<T: StateTransaction> ConflictingLogStore<T> {
    /// Fails the next `conflicts` appends with a duplicate number conflict.
    pub fn new(inner: Arc<dyn TransactionLogStore<T>>, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_remaining: AtomicU32::new(conflicts),
            add_attempts: AtomicU32::new(0),
        }
    }

    /// Fails every append with a duplicate number conflict.
    pub fn always(inner: Arc<dyn TransactionLogStore<T>>) -> Self {
        Self::new(inner, u32::MAX)
    }

    /// Returns how many appends were attempted, including failed ones.
    pub fn add_attempts(&self) -> u32 {
        self.add_attempts.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<T: StateTransaction> TransactionLogStore<T> for ConflictingLogStore<T> {
    async fn add_transaction(
        &self,
        entry: &TransactionLogEntry<T>,
    ) -> Result<(), TransactionLogError> {
        self.add_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_conflict() {
            return Err(TransactionLogError::DuplicateTransactionNumber {
                log: T::LOG,
                number: entry.sequence_number,
            });
        }
        self.inner.add_transaction(entry).await
    }

    fn read_transactions_after(
        &self,
        sequence_number: u64,
    ) -> BoxStream<'_, Result<TransactionLogEntry<T>, TransactionLogError>> {
        self.inner.read_transactions_after(sequence_number)
    }
}

/// Wraps a log store and lets another writer commit just before the first
/// append.
///
/// The wrapped writer has already validated against its state and picked a
/// sequence number, so the racing commit takes that number and the append
/// fails with a real duplicate number conflict.
pub struct RacingLogStore<T: StateTransaction> {
    inner: Arc<dyn TransactionLogStore<T>>,
    race: Mutex<Option<BoxFuture<'static, ()>>>,
    add_attempts: AtomicU32,
}

impl<T: StateTransaction> RacingLogStore<T> {
    /// Runs `race` to completion before the first append reaches `inner`.
    pub fn new(inner: Arc<dyn TransactionLogStore<T>>, race: BoxFuture<'static, ()>) -> Self {
        Self {
            inner,
            race: Mutex::new(Some(race)),
            add_attempts: AtomicU32::new(0),
        }
    }

    /// Returns how many appends were attempted, including failed ones.
    pub fn add_attempts(&self) -> u32 {
        self.add_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: StateTransaction> TransactionLogStore<T> for RacingLogStore<T> {
    async fn add_transaction(
        &self,
        entry: &TransactionLogEntry<T>,
    ) -> Result<(), TransactionLogError> {
        self.add_attempts.fetch_add(1, Ordering::SeqCst);
        let race = self.race.lock().expect("race lock poisoned").take();
        if let Some(race) = race {
            race.await;
        }
        self.inner.add_transaction(entry).await
    }

    fn read_transactions_after(
        &self,
        sequence_number: u64,
    ) -> BoxStream<'_, Result<TransactionLogEntry<T>, TransactionLogError>> {
        self.inner.read_transactions_after(sequence_number)
    }
}
