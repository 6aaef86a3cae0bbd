//! Cached head of one transaction log.
//!
//! The head holds the fold of the log up to the last sequence number this
//! instance has seen. Before every read or update it folds in whatever other
//! writers appended since, so a cached state is never trusted across a
//! validate-then-append boundary.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sediment_core::TableId;

use crate::config::StateStoreConfig;
use crate::error::{Result, StateStoreError, TransactionLogError};
use crate::log::{TransactionLogEntry, TransactionLogStore};
use crate::metrics;
use crate::retry::RetryBackoff;
use crate::snapshot::TransactionLogSnapshotStore;
use crate::transaction::StateTransaction;

#[derive(Debug)]
struct Cached<S> {
    state: S,
    sequence_number: u64,
    snapshot_checked: bool,
}

/// Materialised state of one log, kept current by replaying new entries.
pub(crate) struct TransactionLogHead<T: StateTransaction> {
    table_id: TableId,
    log_store: Arc<dyn TransactionLogStore<T>>,
    snapshots: Option<TransactionLogSnapshotStore>,
    config: StateStoreConfig,
    fixed_update_time: StdMutex<Option<DateTime<Utc>>>,
    cache: Mutex<Cached<T::State>>,
}

impl<T: StateTransaction> TransactionLogHead<T> {
    pub(crate) fn new(
        table_id: TableId,
        log_store: Arc<dyn TransactionLogStore<T>>,
        snapshots: Option<TransactionLogSnapshotStore>,
        config: StateStoreConfig,
    ) -> Self {
        Self {
            table_id,
            log_store,
            snapshots,
            config,
            fixed_update_time: StdMutex::new(None),
            cache: Mutex::new(Cached {
                state: T::State::default(),
                sequence_number: 0,
                snapshot_checked: false,
            }),
        }
    }

    /// Stamps every following transaction with `time` instead of the clock.
    pub(crate) fn fix_update_time(&self, time: DateTime<Utc>) {
        if let Ok(mut fixed) = self.fixed_update_time.lock() {
            *fixed = Some(time);
        }
    }

    fn update_time(&self) -> DateTime<Utc> {
        self.fixed_update_time
            .lock()
            .ok()
            .and_then(|fixed| *fixed)
            .unwrap_or_else(Utc::now)
    }

    /// Runs `f` against the latest state.
    pub(crate) async fn read<R>(&self, f: impl FnOnce(&T::State) -> R) -> Result<R> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;
        Ok(f(&cache.state))
    }

    /// Returns the last sequence number in the log.
    pub(crate) async fn latest_sequence_number(&self) -> Result<u64> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;
        Ok(cache.sequence_number)
    }

    async fn refresh(&self, cache: &mut Cached<T::State>) -> Result<()> {
        if !cache.snapshot_checked {
            self.load_snapshot(cache).await;
            cache.snapshot_checked = true;
        }

        let mut entries = self.log_store.read_transactions_after(cache.sequence_number);
        while let Some(entry) = entries.try_next().await? {
            let expected = cache.sequence_number + 1;
            if entry.sequence_number != expected {
                return Err(TransactionLogError::CorruptEntry {
                    log: T::LOG,
                    message: format!(
                        "expected sequence number {expected}, read {}",
                        entry.sequence_number
                    ),
                }
                .into());
            }
            entry.transaction.apply(&mut cache.state, entry.applied_at);
            cache.sequence_number = entry.sequence_number;
        }
        Ok(())
    }

    /// Starts the cache from the latest snapshot, if snapshots are enabled.
    ///
    /// An unreadable snapshot is skipped and the log replayed from the start.
    async fn load_snapshot(&self, cache: &mut Cached<T::State>) {
        let (true, Some(snapshots)) = (self.config.load_latest_snapshot, &self.snapshots) else {
            return;
        };
        match snapshots.load_latest::<T::State>(T::LOG).await {
            Ok(Some(snapshot)) if snapshot.sequence_number > cache.sequence_number => {
                debug!(
                    table = %self.table_id,
                    log = %T::LOG,
                    sequence_number = snapshot.sequence_number,
                    "loaded state from snapshot"
                );
                cache.state = snapshot.state;
                cache.sequence_number = snapshot.sequence_number;
            }
            Ok(_) => {}
            Err(e) => {
                metrics::record_snapshot_load_failure(T::LOG.as_str());
                warn!(
                    table = %self.table_id,
                    log = %T::LOG,
                    error = %e,
                    "ignoring unreadable snapshot, replaying log"
                );
            }
        }
    }

    /// Validates and appends a transaction, retrying when another writer wins
    /// the append race.
    ///
    /// Every attempt re-reads the log and re-validates, so a transaction made
    /// invalid by a racing writer fails with its validation error instead of
    /// being retried. Returns the committed sequence number.
    pub(crate) async fn add_transaction(&self, transaction: T) -> Result<u64> {
        let kind = transaction.kind();
        let log = T::LOG.as_str();
        let mut backoff = RetryBackoff::new(&self.config);
        let mut entry = TransactionLogEntry::new(0, self.update_time(), transaction);

        loop {
            let wait = {
                let mut cache = self.cache.lock().await;
                self.refresh(&mut cache).await?;

                if let Err(e) = entry.transaction.validate(&cache.state) {
                    let e = StateStoreError::from(e);
                    metrics::record_validation_failure(log, kind);
                    debug!(table = %self.table_id, log, kind, error = %e, "transaction rejected");
                    return Err(e);
                }

                entry.sequence_number = cache.sequence_number + 1;
                entry.applied_at = self.update_time();
                backoff.record_attempt();

                match self.log_store.add_transaction(&entry).await {
                    Ok(()) => {
                        entry.transaction.apply(&mut cache.state, entry.applied_at);
                        cache.sequence_number = entry.sequence_number;
                        metrics::record_commit(log, kind);
                        info!(
                            table = %self.table_id,
                            log,
                            kind,
                            sequence_number = entry.sequence_number,
                            attempts = backoff.attempts(),
                            "committed transaction"
                        );
                        return Ok(entry.sequence_number);
                    }
                    Err(TransactionLogError::DuplicateTransactionNumber { number, .. }) => {
                        metrics::record_conflict(log, kind);
                        let Some(wait) = backoff.next_wait() else {
                            metrics::record_retries_exhausted(log, kind);
                            warn!(
                                table = %self.table_id,
                                log,
                                kind,
                                attempts = backoff.attempts(),
                                elapsed_ms = u64::try_from(backoff.elapsed().as_millis()).unwrap_or(u64::MAX),
                                "giving up after repeated append conflicts"
                            );
                            return Err(StateStoreError::RetriesExhausted {
                                operation: kind,
                                attempts: backoff.attempts(),
                                elapsed: backoff.elapsed(),
                            });
                        };
                        debug!(
                            table = %self.table_id,
                            log,
                            kind,
                            sequence_number = number,
                            attempt = backoff.attempts(),
                            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                            "append conflict, retrying"
                        );
                        wait
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            // the cache lock is released while waiting
            tokio::time::sleep(wait).await;
        }
    }

    /// Writes a snapshot if enough transactions followed the previous one.
    ///
    /// Returns the snapshot's sequence number if one was written.
    pub(crate) async fn create_snapshot(&self) -> Result<Option<u64>> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(None);
        };
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;
        if cache.sequence_number == 0 {
            return Ok(None);
        }
        let previous = snapshots.latest_sequence_number(T::LOG).await?.unwrap_or(0);
        if cache.sequence_number < previous + self.config.snapshot_min_transactions {
            return Ok(None);
        }
        let saved = snapshots
            .save(T::LOG, cache.sequence_number, &cache.state)
            .await?;
        Ok(saved.then_some(cache.sequence_number))
    }
}
