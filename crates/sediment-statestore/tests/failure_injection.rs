//! Retry behaviour when appends conflict or storage fails.

use std::sync::Arc;

use futures::FutureExt;

use sediment_core::JobId;
use sediment_statestore::log::{InMemoryTransactionLogStore, TransactionLogStore};
use sediment_statestore::model::ROOT_PARTITION_ID;
use sediment_statestore::{
    FileReference, FileReferenceTransaction, StateStoreConfig, StateStoreError,
    TransactionLogError, TransactionLogs, ValidationError,
};
use sediment_test_utils::{init_test_logging, ConflictingLogStore, RacingLogStore, TestContext};

fn logs_with_conflicts(conflicts: Arc<ConflictingLogStore<FileReferenceTransaction>>) -> TransactionLogs {
    TransactionLogs {
        files: conflicts,
        ..TransactionLogs::in_memory()
    }
}

#[tokio::test(start_paused = true)]
async fn conflict_then_success_commits_exactly_once() {
    init_test_logging();
    let ctx = TestContext::new();
    let files = Arc::new(InMemoryTransactionLogStore::new());
    let inner: Arc<dyn TransactionLogStore<FileReferenceTransaction>> = files.clone();
    let conflicting = Arc::new(ConflictingLogStore::new(inner, 1));
    let store = ctx.state_store_with_logs(logs_with_conflicts(conflicting.clone()));
    store.initialise().await.unwrap();

    store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap();

    assert_eq!(conflicting.add_attempts(), 2);
    assert_eq!(files.len().unwrap(), 1);
    assert_eq!(store.get_all_file_references().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn endless_conflicts_exhaust_retries() {
    let mut ctx = TestContext::new();
    ctx.config = StateStoreConfig {
        max_add_attempts: 5,
        ..StateStoreConfig::testing()
    };
    let files = Arc::new(InMemoryTransactionLogStore::new());
    let inner: Arc<dyn TransactionLogStore<FileReferenceTransaction>> = files.clone();
    let conflicting = Arc::new(ConflictingLogStore::always(inner));
    let store = ctx.state_store_with_logs(logs_with_conflicts(conflicting.clone()));
    store.initialise().await.unwrap();

    let err = store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap_err();

    match err {
        StateStoreError::RetriesExhausted {
            operation,
            attempts,
            ..
        } => {
            assert_eq!(operation, "add_files");
            assert_eq!(attempts, 5);
        }
        other => panic!("expected RetriesExhausted, got {other}"),
    }
    assert_eq!(conflicting.add_attempts(), 5);
    assert!(files.is_empty().unwrap());
}

#[tokio::test(start_paused = true)]
async fn elapsed_budget_bounds_retries() {
    let mut ctx = TestContext::new();
    ctx.config = StateStoreConfig {
        min_retry_wait_ms: 1_000,
        max_retry_wait_ms: 1_000,
        max_retry_elapsed_ms: 3_500,
        max_add_attempts: 1_000,
        ..StateStoreConfig::testing()
    };
    let files = Arc::new(InMemoryTransactionLogStore::new());
    let inner: Arc<dyn TransactionLogStore<FileReferenceTransaction>> = files.clone();
    let conflicting = Arc::new(ConflictingLogStore::always(inner));
    let store = ctx.state_store_with_logs(logs_with_conflicts(conflicting.clone()));
    store.initialise().await.unwrap();

    let err = store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, StateStoreError::RetriesExhausted { .. }));
    // one second between attempts, giving up once 3.5 seconds have passed
    assert!(conflicting.add_attempts() <= 5);
}

#[tokio::test(start_paused = true)]
async fn claim_lost_to_racing_writer_fails_revalidation() {
    init_test_logging();
    let ctx = TestContext::new();
    let logs = TransactionLogs::in_memory();
    let first = Arc::new(ctx.state_store_with_logs(logs.clone()));
    first.initialise().await.unwrap();
    first
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap();

    let winner = JobId::new("job-a");
    let race = {
        let first = first.clone();
        let winner = winner.clone();
        async move {
            first
                .assign_job_id(&winner, ROOT_PARTITION_ID, vec!["f1.parquet".into()])
                .await
                .unwrap();
        }
        .boxed()
    };
    let racing = Arc::new(RacingLogStore::new(logs.files.clone(), race));
    let second = ctx.state_store_with_logs(TransactionLogs {
        files: racing.clone(),
        ..logs.clone()
    });
    // the second instance caches the unclaimed reference before the race
    assert_eq!(
        second.get_file_references_with_no_job_id().await.unwrap().len(),
        1
    );

    let err = second
        .assign_job_id(
            &JobId::new("job-b"),
            ROOT_PARTITION_ID,
            vec!["f1.parquet".into()],
        )
        .await
        .unwrap_err();

    match err.as_validation() {
        Some(ValidationError::FileReferenceAssignedToJob { job_id, .. }) => {
            assert_eq!(job_id, &winner);
        }
        other => panic!("expected FileReferenceAssignedToJob, got {other:?}"),
    }
    // one append lost the race, the retry was rejected before appending
    assert_eq!(racing.add_attempts(), 1);
    assert_eq!(second.latest_sequence_numbers().await.unwrap().0, 2);
    let references = first.get_all_file_references().await.unwrap();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].job_id.as_ref(), Some(&winner));
}

#[tokio::test]
async fn validation_failure_is_not_retried() {
    let ctx = TestContext::new();
    let store = ctx.state_store();
    store.initialise().await.unwrap();
    store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap();

    let err = store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_validation(),
        Some(ValidationError::FileReferenceAlreadyExists { .. })
    ));
    assert_eq!(store.latest_sequence_numbers().await.unwrap().0, 1);
}

#[tokio::test]
async fn storage_failure_surfaces_without_changing_state() {
    let ctx = TestContext::new();
    let store = ctx.state_store();
    store.initialise().await.unwrap();

    let log_prefix = format!("{}transactions/files/", ctx.table.table_id.storage_prefix());
    ctx.storage.inject_write_failure(&log_prefix);
    let err = store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StateStoreError::Log(TransactionLogError::Storage(_))
    ));
    assert!(store.get_all_file_references().await.unwrap().is_empty());

    ctx.storage.clear_failures();
    store
        .add_file(FileReference::ingested("f1.parquet", ROOT_PARTITION_ID, 10))
        .await
        .unwrap();
    assert_eq!(store.get_all_file_references().await.unwrap().len(), 1);
}
