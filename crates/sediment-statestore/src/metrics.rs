//! State store metrics.
//!
//! Recorded through the `metrics` facade; the host process installs a
//! recorder. These complement the structured logs emitted at the same points.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Transaction Metrics
// ============================================================================

/// Transactions committed to a log.
pub const TRANSACTIONS_COMMITTED: &str = "sediment_statestore_transactions_committed_total";

/// Appends that lost a race to another writer.
pub const APPEND_CONFLICTS: &str = "sediment_statestore_append_conflicts_total";

/// Updates that gave up after exhausting the retry budget.
pub const RETRIES_EXHAUSTED: &str = "sediment_statestore_retries_exhausted_total";

/// Transactions rejected by validation.
pub const VALIDATION_FAILURES: &str = "sediment_statestore_validation_failures_total";

/// Snapshots that could not be loaded and were skipped.
pub const SNAPSHOT_LOAD_FAILURES: &str = "sediment_statestore_snapshot_load_failures_total";

// ============================================================================
// GC Metrics
// ============================================================================

/// Files physically deleted by GC.
pub const GC_FILES_DELETED: &str = "sediment_gc_files_deleted_total";

/// Files GC failed to delete.
pub const GC_FILE_FAILURES: &str = "sediment_gc_file_failures_total";

/// Delete transactions that failed after the files were deleted.
pub const GC_STATE_STORE_UPDATE_FAILURES: &str = "sediment_gc_state_store_update_failures_total";

/// GC run duration histogram.
pub const GC_RUN_DURATION: &str = "sediment_gc_run_duration_seconds";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all state store metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(TRANSACTIONS_COMMITTED, "Total transactions committed");
    describe_counter!(APPEND_CONFLICTS, "Total transaction log append conflicts");
    describe_counter!(RETRIES_EXHAUSTED, "Total updates that exhausted their retries");
    describe_counter!(VALIDATION_FAILURES, "Total transactions rejected by validation");
    describe_counter!(SNAPSHOT_LOAD_FAILURES, "Total unreadable snapshots skipped");
    describe_counter!(GC_FILES_DELETED, "Total files deleted by GC");
    describe_counter!(GC_FILE_FAILURES, "Total files GC failed to delete");
    describe_counter!(
        GC_STATE_STORE_UPDATE_FAILURES,
        "Total GC delete transactions that failed"
    );
    describe_histogram!(GC_RUN_DURATION, "Duration of GC runs in seconds");
}

// ============================================================================
// Transaction Metric Recording
// ============================================================================

/// Records a committed transaction.
pub fn record_commit(log: &'static str, kind: &'static str) {
    counter!(TRANSACTIONS_COMMITTED, "log" => log, "kind" => kind).increment(1);
}

/// Records a lost append race.
pub fn record_conflict(log: &'static str, kind: &'static str) {
    counter!(APPEND_CONFLICTS, "log" => log, "kind" => kind).increment(1);
}

/// Records an update that ran out of retries.
pub fn record_retries_exhausted(log: &'static str, kind: &'static str) {
    counter!(RETRIES_EXHAUSTED, "log" => log, "kind" => kind).increment(1);
}

/// Records a transaction rejected by validation.
pub fn record_validation_failure(log: &'static str, kind: &'static str) {
    counter!(VALIDATION_FAILURES, "log" => log, "kind" => kind).increment(1);
}

/// Records a snapshot that failed to load.
pub fn record_snapshot_load_failure(log: &'static str) {
    counter!(SNAPSHOT_LOAD_FAILURES, "log" => log).increment(1);
}

// ============================================================================
// GC Metric Recording
// ============================================================================

/// Records the outcome of collecting one table.
pub fn record_gc_table(
    table: &str,
    deleted: u64,
    file_failures: u64,
    update_failures: u64,
) {
    let labels = [("table", table.to_string())];

    counter!(GC_FILES_DELETED, &labels).increment(deleted);
    counter!(GC_FILE_FAILURES, &labels).increment(file_failures);
    counter!(GC_STATE_STORE_UPDATE_FAILURES, &labels).increment(update_failures);
}

/// Records a completed GC run.
pub fn record_gc_run(duration_secs: f64) {
    histogram!(GC_RUN_DURATION).record(duration_secs);
}
