//! Several state store instances writing the same table at once.

use std::sync::Arc;

use sediment_core::JobId;
use sediment_statestore::model::ROOT_PARTITION_ID;
use sediment_statestore::{FileReference, ValidationError};
use sediment_test_utils::{init_test_logging, FileFactory, TestContext};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_all_commit_without_gaps() {
    init_test_logging();
    let ctx = TestContext::new();
    ctx.state_store().initialise().await.unwrap();

    let writers = 6;
    let files_per_writer = 5;
    let mut handles = Vec::new();
    for writer in 0..writers {
        let store = Arc::new(ctx.state_store());
        handles.push(tokio::spawn(async move {
            for i in 0..files_per_writer {
                let name = FileFactory::filename(&format!("w{writer}"), i);
                store
                    .add_file(FileReference::ingested(name, ROOT_PARTITION_ID, 10))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let reader = ctx.state_store();
    let references = reader.get_all_file_references().await.unwrap();
    assert_eq!(references.len(), writers * files_per_writer);
    let (files_seq, partitions_seq) = reader.latest_sequence_numbers().await.unwrap();
    assert_eq!(files_seq, u64::try_from(writers * files_per_writer).unwrap());
    assert_eq!(partitions_seq, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_job_assignment_has_one_winner() {
    init_test_logging();
    let ctx = TestContext::new();
    let setup = ctx.state_store();
    setup.initialise().await.unwrap();
    setup
        .add_file(FileReference::ingested("shared.parquet", ROOT_PARTITION_ID, 100))
        .await
        .unwrap();

    let contenders: Vec<_> = ["job-a", "job-b"]
        .into_iter()
        .map(|job| {
            let store = Arc::new(ctx.state_store());
            tokio::spawn(async move {
                let job_id = JobId::new(job);
                let result = store
                    .assign_job_id(&job_id, ROOT_PARTITION_ID, vec!["shared.parquet".into()])
                    .await;
                (job_id, result)
            })
        })
        .collect();

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for contender in contenders {
        let (job_id, result) = contender.await.unwrap();
        match result {
            Ok(()) => winners.push(job_id),
            Err(e) => {
                assert!(
                    matches!(
                        e.as_validation(),
                        Some(ValidationError::FileReferenceAssignedToJob { .. })
                    ),
                    "loser should see a validation error, got {e}"
                );
                losers.push(job_id);
            }
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);

    // the loser cannot commit a compaction of the file
    let err = setup
        .atomically_replace_files_with_new_references(
            &losers[0],
            ROOT_PARTITION_ID,
            vec!["shared.parquet".into()],
            vec![FileReference::compacted("out.parquet", ROOT_PARTITION_ID, 100)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_validation(),
        Some(ValidationError::FileReferenceNotAssignedToJob { .. })
    ));

    // the winner can
    setup
        .atomically_replace_files_with_new_references(
            &winners[0],
            ROOT_PARTITION_ID,
            vec!["shared.parquet".into()],
            vec![FileReference::compacted("out.parquet", ROOT_PARTITION_ID, 100)],
        )
        .await
        .unwrap();
    assert_eq!(
        setup.get_files_with_no_references(10).await.unwrap().filenames,
        vec!["shared.parquet"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_instance_revalidates_after_losing_race() {
    let ctx = TestContext::new();
    let first = ctx.state_store();
    let second = ctx.state_store();
    first.initialise().await.unwrap();

    // second caches the state before first deletes the file's last reference
    first
        .add_file(FileReference::ingested("f.parquet", ROOT_PARTITION_ID, 1))
        .await
        .unwrap();
    assert_eq!(second.get_all_file_references().await.unwrap().len(), 1);
    first.clear_file_data().await.unwrap();

    let job = JobId::new("late-job");
    let err = second
        .assign_job_id(&job, ROOT_PARTITION_ID, vec!["f.parquet".into()])
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_validation(),
        Some(ValidationError::FileReferenceNotFound { .. })
    ));
}
