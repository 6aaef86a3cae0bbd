//! Job-aware commits.
//!
//! Ingest and compaction jobs change file references and report their
//! progress to a [`JobStatusStore`]. These helpers do both in the right order:
//! the state store update is the commit point, and the job status follows it.
//! If the update is rejected the run is recorded as failed with the reason.

use chrono::{DateTime, Utc};

use sediment_core::JobId;

use crate::error::Result;
use crate::job_status::{JobStatusStore, JobStatusUpdate, JobType, RecordsProcessedSummary};
use crate::model::FileReference;
use crate::state_store::StateStore;

/// A finished compaction run, ready to commit.
#[derive(Debug, Clone)]
pub struct CompactionCommit {
    /// The job.
    pub job_id: JobId,
    /// The run that produced the output.
    pub run_id: String,
    /// Partition the inputs were compacted in.
    pub partition_id: String,
    /// Files rewritten by the run.
    pub input_files: Vec<String>,
    /// References to the output files.
    pub output: Vec<FileReference>,
    /// What the run processed.
    pub summary: RecordsProcessedSummary,
}

/// Claims input files for a compaction job and records the job as created.
///
/// # Errors
///
/// Fails if another job holds any input, or the job cannot be recorded.
pub async fn create_compaction_job(
    store: &StateStore,
    job_status: &dyn JobStatusStore,
    job_id: &JobId,
    partition_id: &str,
    input_files: Vec<String>,
    time: DateTime<Utc>,
) -> Result<()> {
    store
        .assign_job_id(job_id, partition_id, input_files.clone())
        .await?;
    job_status
        .record(
            job_id,
            JobStatusUpdate::Created {
                job_type: JobType::Compaction,
                table_id: store.table_id().clone(),
                partition_id: Some(partition_id.to_string()),
                input_files,
            },
            time,
        )
        .await?;
    Ok(())
}

/// Replaces a compaction job's inputs with its output and marks the run finished.
///
/// If the replacement is rejected, for example because the job lost its claim
/// on an input, the run is marked failed and the rejection is returned.
///
/// # Errors
///
/// Returns the state store error.
pub async fn commit_compaction(
    store: &StateStore,
    job_status: &dyn JobStatusStore,
    commit: CompactionCommit,
    time: DateTime<Utc>,
) -> Result<()> {
    let CompactionCommit {
        job_id,
        run_id,
        partition_id,
        input_files,
        output,
        summary,
    } = commit;

    let replaced = store
        .atomically_replace_files_with_new_references(&job_id, &partition_id, input_files, output)
        .await;
    finish_run(job_status, &job_id, run_id, summary, replaced, time).await
}

/// Adds an ingest job's output files and marks the run finished.
///
/// # Errors
///
/// Returns the state store error.
pub async fn commit_ingest(
    store: &StateStore,
    job_status: &dyn JobStatusStore,
    job_id: &JobId,
    run_id: impl Into<String>,
    files: Vec<FileReference>,
    summary: RecordsProcessedSummary,
    time: DateTime<Utc>,
) -> Result<()> {
    let added = store.add_files(files).await;
    finish_run(job_status, job_id, run_id.into(), summary, added, time).await
}

/// Records how a run ended.
///
/// The state store outcome is what the caller gets back. A failure to record
/// the job status is logged and does not replace it.
async fn finish_run(
    job_status: &dyn JobStatusStore,
    job_id: &JobId,
    run_id: String,
    summary: RecordsProcessedSummary,
    outcome: Result<()>,
    time: DateTime<Utc>,
) -> Result<()> {
    let update = match &outcome {
        Ok(()) => JobStatusUpdate::Finished {
            run_id: run_id.clone(),
            summary,
        },
        Err(e) => {
            tracing::warn!(job_id = %job_id, run_id = %run_id, error = %e, "job commit rejected");
            JobStatusUpdate::Failed {
                run_id: run_id.clone(),
                reasons: vec![e.to_string()],
            }
        }
    };
    if let Err(e) = job_status.record(job_id, update, time).await {
        tracing::warn!(
            job_id = %job_id,
            run_id = %run_id,
            committed = outcome.is_ok(),
            error = %e,
            "failed to record job run outcome"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    use sediment_core::TableId;

    use crate::error::ValidationError;
    use crate::job_status::{InMemoryJobStatusStore, JobState};
    use crate::model::{RowKeyType, TableProperties, TableSchema, ROOT_PARTITION_ID};

    fn time(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    fn summary() -> RecordsProcessedSummary {
        RecordsProcessedSummary {
            records_read: 30,
            records_written: 30,
            start_time: time(1),
            finish_time: time(2),
        }
    }

    async fn store_with_files() -> StateStore {
        let store = StateStore::in_memory(TableProperties::new(
            TableId::new("events").unwrap(),
            TableSchema::single_key(RowKeyType::Long),
        ));
        store.initialise().await.unwrap();
        store
            .add_files(vec![
                FileReference::ingested("a", ROOT_PARTITION_ID, 10),
                FileReference::ingested("b", ROOT_PARTITION_ID, 20),
            ])
            .await
            .unwrap();
        store
    }

    fn commit(job_id: &JobId) -> CompactionCommit {
        CompactionCommit {
            job_id: job_id.clone(),
            run_id: "run-1".into(),
            partition_id: ROOT_PARTITION_ID.into(),
            input_files: vec!["a".into(), "b".into()],
            output: vec![FileReference::compacted("c", ROOT_PARTITION_ID, 30)],
            summary: summary(),
        }
    }

    #[tokio::test]
    async fn compaction_commit_finishes_job() {
        let store = store_with_files().await;
        let jobs = InMemoryJobStatusStore::new();
        let job = JobId::new("job-1");

        create_compaction_job(&store, &jobs, &job, ROOT_PARTITION_ID, vec!["a".into(), "b".into()], time(0))
            .await
            .unwrap();
        jobs.record(&job, JobStatusUpdate::Started { run_id: "run-1".into() }, time(1))
            .await
            .unwrap();
        commit_compaction(&store, &jobs, commit(&job), time(2)).await.unwrap();

        let status = jobs.get_job(&job).await.unwrap().unwrap();
        assert_eq!(status.state(), JobState::Finished);
        assert_eq!(status.input_files, vec!["a", "b"]);
        let live = store.get_all_file_references().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].filename, "c");
    }

    #[tokio::test]
    async fn rejected_commit_fails_run() {
        let store = store_with_files().await;
        let jobs = InMemoryJobStatusStore::new();
        let job = JobId::new("job-1");

        // the job never claimed its inputs in the state store
        jobs.record(
            &job,
            JobStatusUpdate::Created {
                job_type: JobType::Compaction,
                table_id: store.table_id().clone(),
                partition_id: Some(ROOT_PARTITION_ID.into()),
                input_files: vec!["a".into(), "b".into()],
            },
            time(0),
        )
        .await
        .unwrap();
        jobs.record(&job, JobStatusUpdate::Started { run_id: "run-1".into() }, time(1))
            .await
            .unwrap();

        let err = commit_compaction(&store, &jobs, commit(&job), time(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::FileReferenceNotAssignedToJob { .. })
        ));

        let status = jobs.get_job(&job).await.unwrap().unwrap();
        assert_eq!(status.state(), JobState::Failed);
        assert_eq!(store.get_all_file_references().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ingest_commit_adds_files() {
        let store = store_with_files().await;
        let jobs = InMemoryJobStatusStore::new();
        let job = JobId::new("ingest-1");
        jobs.record(
            &job,
            JobStatusUpdate::Created {
                job_type: JobType::Ingest,
                table_id: store.table_id().clone(),
                partition_id: None,
                input_files: vec!["s3://bucket/input.csv".into()],
            },
            time(0),
        )
        .await
        .unwrap();
        jobs.record(&job, JobStatusUpdate::Started { run_id: "r".into() }, time(1))
            .await
            .unwrap();

        commit_ingest(
            &store,
            &jobs,
            &job,
            "r",
            vec![FileReference::ingested("d", ROOT_PARTITION_ID, 5)],
            summary(),
            time(2),
        )
        .await
        .unwrap();

        assert!(jobs.get_job(&job).await.unwrap().unwrap().is_finished());
        assert_eq!(store.get_all_file_references().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unrecorded_ingest_still_commits() {
        let store = store_with_files().await;
        let jobs = InMemoryJobStatusStore::new();
        let job = JobId::new("never-created");

        commit_ingest(
            &store,
            &jobs,
            &job,
            "r",
            vec![FileReference::ingested("d", ROOT_PARTITION_ID, 5)],
            summary(),
            time(2),
        )
        .await
        .unwrap();

        assert!(jobs.get_job(&job).await.unwrap().is_none());
        assert_eq!(store.get_all_file_references().await.unwrap().len(), 3);

        let err = commit_ingest(
            &store,
            &jobs,
            &job,
            "r",
            vec![FileReference::ingested("d", ROOT_PARTITION_ID, 5)],
            summary(),
            time(3),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::FileReferenceAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn rejection_survives_unrecorded_failure() {
        let store = store_with_files().await;
        let jobs = InMemoryJobStatusStore::new();
        let job = JobId::new("never-created");

        let err = commit_compaction(&store, &jobs, commit(&job), time(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::FileReferenceNotAssignedToJob { .. })
        ));
        assert!(jobs.get_job(&job).await.unwrap().is_none());
    }
}
