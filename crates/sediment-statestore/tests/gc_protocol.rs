//! Garbage collection against a data store that fails on request.

use std::sync::Arc;

use sediment_core::{JobId, StorageBackend, WritePrecondition};
use sediment_statestore::gc::{GarbageCollector, GcConfig};
use sediment_statestore::model::ROOT_PARTITION_ID;
use sediment_statestore::{FileReference, StateStore};
use sediment_test_utils::{
    fixed_time, init_test_logging, FileFactory, TestContext, TracingMemoryBackend,
};

/// Writes `count` data files, references them, then compacts them all away.
async fn unreferenced_files(
    store: &StateStore,
    data: &TracingMemoryBackend,
    count: usize,
) -> Vec<String> {
    let references = FileFactory::ingested("in", ROOT_PARTITION_ID, count);
    let filenames = FileFactory::filenames(&references);
    for name in &filenames {
        data.put(name, bytes::Bytes::from_static(b"rows"), WritePrecondition::None)
            .await
            .unwrap();
    }
    store.fix_file_update_time(fixed_time(0));
    store.add_files(references).await.unwrap();

    let job = JobId::new("compact-all");
    store
        .assign_job_id(&job, ROOT_PARTITION_ID, filenames.clone())
        .await
        .unwrap();
    store
        .atomically_replace_files_with_new_references(
            &job,
            ROOT_PARTITION_ID,
            filenames.clone(),
            vec![FileReference::compacted("out.parquet", ROOT_PARTITION_ID, 1)],
        )
        .await
        .unwrap();
    filenames
}

#[tokio::test]
async fn unreferenced_listing_is_truncated_at_max() {
    let ctx = TestContext::new();
    let store = ctx.state_store();
    store.initialise().await.unwrap();
    let data = TracingMemoryBackend::new();
    unreferenced_files(&store, &data, 150).await;

    let listing = store.get_files_with_no_references(100).await.unwrap();
    assert_eq!(listing.filenames.len(), 100);
    assert!(listing.more_than_max);

    let all = store.get_files_with_no_references(150).await.unwrap();
    assert_eq!(all.filenames.len(), 150);
    assert!(!all.more_than_max);

    // live references never appear in the unreferenced view
    let live = store.get_all_file_references().await.unwrap();
    assert_eq!(live.len(), 1);
    assert!(!all.filenames.contains(&live[0].filename));
}

#[tokio::test]
async fn file_failures_do_not_block_the_batch() {
    init_test_logging();
    let ctx = TestContext::new();
    let store = Arc::new(ctx.state_store());
    store.initialise().await.unwrap();
    let data = TracingMemoryBackend::new();
    let filenames = unreferenced_files(&store, &data, 5).await;
    data.inject_failure(filenames[2].clone());

    let data_store: Arc<dyn StorageBackend> = Arc::new(data.clone());
    let collector =
        GarbageCollector::new(vec![store.clone()], data_store, GcConfig::testing()).unwrap();
    let report = collector.run_at(fixed_time(60)).await;

    assert_eq!(report.files_deleted(), 4);
    assert_eq!(report.failures.len(), 1);
    let failures = &report.failures[0];
    assert_eq!(failures.table_id, ctx.table.table_id);
    assert_eq!(failures.file_failures.len(), 1);
    assert_eq!(failures.file_failures[0].filename, filenames[2]);
    assert!(failures.state_store_update_failures.is_empty());

    // the failed file is still tracked, and the next run deletes it
    assert_eq!(
        store.get_files_with_no_references(10).await.unwrap().filenames,
        vec![filenames[2].clone()]
    );
    data.clear_failures();
    let report = collector.run_at(fixed_time(120)).await;
    assert_eq!(report.files_deleted(), 1);
    assert!(!report.has_failures());
    assert!(!data.exists(&filenames[2]).await);
}

#[tokio::test]
async fn state_store_update_failure_is_reported_and_recovered() {
    init_test_logging();
    let ctx = TestContext::new();
    let store = Arc::new(ctx.state_store());
    store.initialise().await.unwrap();
    let data = TracingMemoryBackend::new();
    let filenames = unreferenced_files(&store, &data, 3).await;

    let log_prefix = format!("{}transactions/files/", ctx.table.table_id.storage_prefix());
    ctx.storage.inject_write_failure(&log_prefix);

    let data_store: Arc<dyn StorageBackend> = Arc::new(data.clone());
    let collector =
        GarbageCollector::new(vec![store.clone()], data_store, GcConfig::testing()).unwrap();
    let report = collector.run_at(fixed_time(60)).await;

    assert_eq!(report.files_deleted(), 0);
    let failures = &report.failures[0];
    assert!(failures.file_failures.is_empty());
    assert_eq!(failures.state_store_update_failures.len(), 1);
    assert_eq!(failures.state_store_update_failures[0].filenames, filenames);
    for name in &filenames {
        assert!(!data.exists(name).await, "{name} should be physically deleted");
    }

    // metadata removal succeeds on the next run; deleting the absent files again is harmless
    ctx.storage.clear_failures();
    let report = collector.run_at(fixed_time(120)).await;
    assert!(!report.has_failures());
    assert_eq!(report.tables[0].deleted, filenames);
    assert!(store
        .get_files_with_no_references(10)
        .await
        .unwrap()
        .filenames
        .is_empty());
}

#[tokio::test]
async fn repeated_runs_are_idempotent() {
    let ctx = TestContext::new();
    let store = Arc::new(ctx.state_store());
    store.initialise().await.unwrap();
    let data = TracingMemoryBackend::new();
    let filenames = unreferenced_files(&store, &data, 4).await;

    let data_store: Arc<dyn StorageBackend> = Arc::new(data.clone());
    let collector =
        GarbageCollector::new(vec![store.clone()], data_store, GcConfig::testing()).unwrap();
    assert_eq!(collector.run_at(fixed_time(60)).await.files_deleted(), 4);
    assert_eq!(collector.run_at(fixed_time(120)).await.files_deleted(), 0);

    // forgetting already forgotten files is a no-op
    store
        .delete_garbage_collected_files(filenames.clone())
        .await
        .unwrap();
    assert!(store
        .get_files_with_no_references(10)
        .await
        .unwrap()
        .filenames
        .is_empty());
    assert_eq!(data.deleted_paths(), filenames);
}

#[tokio::test]
async fn referenced_files_are_never_forgotten() {
    let ctx = TestContext::new();
    let store = ctx.state_store();
    store.initialise().await.unwrap();
    store
        .add_file(FileReference::ingested("live.parquet", ROOT_PARTITION_ID, 1))
        .await
        .unwrap();

    let err = store
        .delete_garbage_collected_files(vec!["live.parquet".into()])
        .await
        .unwrap_err();
    assert!(err.as_validation().is_some());
    assert_eq!(store.get_all_file_references().await.unwrap().len(), 1);
}
