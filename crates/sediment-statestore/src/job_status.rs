//! Job status tracking for ingest and compaction jobs.
//!
//! Each job moves through `Created -> Started -> Finished`. A job may be run
//! more than once (retries); every run is kept, and the job's status reflects
//! its latest run. Ingest jobs may be rejected before any run starts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sediment_core::{JobId, PollConfig, TableId};

use crate::error::JobStatusError;

/// Kind of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    /// Writes new files from incoming records.
    Ingest,
    /// Rewrites files of one partition into one.
    Compaction,
}

/// Counts and timings reported when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsProcessedSummary {
    /// Records read from input files.
    pub records_read: u64,
    /// Records written to output files.
    pub records_written: u64,
    /// When the run started processing.
    pub start_time: DateTime<Utc>,
    /// When the run finished processing.
    pub finish_time: DateTime<Utc>,
}

impl RecordsProcessedSummary {
    /// Time spent processing.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finish_time - self.start_time
    }

    /// Records written per second, or zero for an instant run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn records_written_per_second(&self) -> f64 {
        let millis = self.duration().num_milliseconds();
        if millis <= 0 {
            return 0.0;
        }
        self.records_written as f64 * 1000.0 / millis as f64
    }
}

/// An event in the life of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobStatusUpdate {
    /// The job was created and its inputs fixed.
    Created {
        /// Kind of job.
        job_type: JobType,
        /// Table the job works on.
        table_id: TableId,
        /// Partition of the inputs, for compaction.
        partition_id: Option<String>,
        /// Input files.
        input_files: Vec<String>,
    },
    /// A run started.
    Started {
        /// ID of the run.
        run_id: String,
    },
    /// A run committed its output.
    Finished {
        /// ID of the run.
        run_id: String,
        /// What the run processed.
        summary: RecordsProcessedSummary,
    },
    /// A run failed.
    Failed {
        /// ID of the run.
        run_id: String,
        /// Why it failed.
        reasons: Vec<String>,
    },
    /// The job was refused before running. Ingest only.
    Rejected {
        /// Why it was refused.
        reasons: Vec<String>,
    },
}

impl JobStatusUpdate {
    const fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Started { .. } => "started",
            Self::Finished { .. } => "finished",
            Self::Failed { .. } => "failed",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// State of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    /// Running.
    InProgress,
    /// Committed.
    Finished,
    /// Failed.
    Failed,
}

/// One attempt at running a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    /// ID of the run.
    pub run_id: String,
    /// Current state.
    pub state: RunState,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished or failed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Summary, once finished.
    pub summary: Option<RecordsProcessedSummary>,
    /// Failure reasons, once failed.
    #[serde(default)]
    pub failure_reasons: Vec<String>,
}

/// Overall state of a job, taken from its latest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Created, no run started yet.
    Created,
    /// The latest run is in progress.
    InProgress,
    /// The latest run finished.
    Finished,
    /// The latest run failed.
    Failed,
    /// Refused before running.
    Rejected,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::InProgress => "in progress",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Everything known about a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// The job.
    pub job_id: JobId,
    /// Kind of job.
    pub job_type: JobType,
    /// Table the job works on.
    pub table_id: TableId,
    /// Partition of the inputs, for compaction.
    pub partition_id: Option<String>,
    /// Input files.
    pub input_files: Vec<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was rejected, if it was.
    pub rejected_at: Option<DateTime<Utc>>,
    /// Why the job was rejected.
    #[serde(default)]
    pub rejection_reasons: Vec<String>,
    /// Runs in the order they started.
    #[serde(default)]
    pub runs: Vec<JobRun>,
}

impl JobStatus {
    /// Returns the job's overall state.
    #[must_use]
    pub fn state(&self) -> JobState {
        if self.rejected_at.is_some() {
            return JobState::Rejected;
        }
        match self.latest_run().map(|run| run.state) {
            None => JobState::Created,
            Some(RunState::InProgress) => JobState::InProgress,
            Some(RunState::Finished) => JobState::Finished,
            Some(RunState::Failed) => JobState::Failed,
        }
    }

    /// Returns the most recently started run.
    #[must_use]
    pub fn latest_run(&self) -> Option<&JobRun> {
        self.runs.last()
    }

    /// Returns true once the job needs no more runs.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), JobState::Finished | JobState::Rejected)
    }

    fn created(job_id: &JobId, update: &JobStatusUpdate, time: DateTime<Utc>) -> Option<Self> {
        let JobStatusUpdate::Created {
            job_type,
            table_id,
            partition_id,
            input_files,
        } = update
        else {
            return None;
        };
        Some(Self {
            job_id: job_id.clone(),
            job_type: *job_type,
            table_id: table_id.clone(),
            partition_id: partition_id.clone(),
            input_files: input_files.clone(),
            created_at: time,
            rejected_at: None,
            rejection_reasons: Vec::new(),
            runs: Vec::new(),
        })
    }

    /// Applies an update, rejecting it if it is not allowed from the current state.
    ///
    /// # Errors
    ///
    /// Returns [`JobStatusError::InvalidTransition`] for updates out of order.
    pub fn apply(
        &mut self,
        update: &JobStatusUpdate,
        time: DateTime<Utc>,
    ) -> Result<(), JobStatusError> {
        let state = self.state();
        let job_id = self.job_id.clone();
        let invalid = || JobStatusError::InvalidTransition {
            job_id: job_id.clone(),
            current: state.to_string(),
            update: update.name().to_string(),
        };

        match update {
            JobStatusUpdate::Created { .. } => Err(invalid()),
            JobStatusUpdate::Started { run_id } => {
                if state == JobState::Rejected || self.run_mut(run_id).is_some() {
                    return Err(invalid());
                }
                self.runs.push(JobRun {
                    run_id: run_id.clone(),
                    state: RunState::InProgress,
                    started_at: time,
                    ended_at: None,
                    summary: None,
                    failure_reasons: Vec::new(),
                });
                Ok(())
            }
            JobStatusUpdate::Finished { run_id, summary } => {
                let Some(run) = self.open_run(run_id) else {
                    return Err(invalid());
                };
                run.state = RunState::Finished;
                run.ended_at = Some(time);
                run.summary = Some(summary.clone());
                Ok(())
            }
            JobStatusUpdate::Failed { run_id, reasons } => {
                let Some(run) = self.open_run(run_id) else {
                    return Err(invalid());
                };
                run.state = RunState::Failed;
                run.ended_at = Some(time);
                run.failure_reasons.clone_from(reasons);
                Ok(())
            }
            JobStatusUpdate::Rejected { reasons } => {
                if self.job_type != JobType::Ingest || state != JobState::Created {
                    return Err(invalid());
                }
                self.rejected_at = Some(time);
                self.rejection_reasons.clone_from(reasons);
                Ok(())
            }
        }
    }

    fn run_mut(&mut self, run_id: &str) -> Option<&mut JobRun> {
        self.runs.iter_mut().find(|run| run.run_id == run_id)
    }

    fn open_run(&mut self, run_id: &str) -> Option<&mut JobRun> {
        self.run_mut(run_id)
            .filter(|run| run.state == RunState::InProgress)
    }
}

/// Records job status updates.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Records an update for a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobStatusError::JobNotFound`] for an update to an unknown job,
    /// or [`JobStatusError::InvalidTransition`] for an update out of order.
    async fn record(
        &self,
        job_id: &JobId,
        update: JobStatusUpdate,
        time: DateTime<Utc>,
    ) -> Result<(), JobStatusError>;

    /// Returns the status of a job.
    async fn get_job(&self, job_id: &JobId) -> sediment_core::Result<Option<JobStatus>>;

    /// Returns every job on a table, ordered by job ID.
    async fn get_jobs_for_table(&self, table_id: &TableId)
        -> sediment_core::Result<Vec<JobStatus>>;

    /// Returns jobs on a table that still need a run.
    async fn get_unfinished_jobs(
        &self,
        table_id: &TableId,
    ) -> sediment_core::Result<Vec<JobStatus>> {
        let mut jobs = self.get_jobs_for_table(table_id).await?;
        jobs.retain(|job| !job.is_finished());
        Ok(jobs)
    }
}

/// Job status store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStatusStore {
    jobs: RwLock<BTreeMap<JobId, JobStatus>>,
}

impl InMemoryJobStatusStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> sediment_core::Error {
    sediment_core::Error::Internal {
        message: "job status lock poisoned".into(),
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStatusStore {
    async fn record(
        &self,
        job_id: &JobId,
        update: JobStatusUpdate,
        time: DateTime<Utc>,
    ) -> Result<(), JobStatusError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        match jobs.get_mut(job_id) {
            Some(status) => status.apply(&update, time),
            None => {
                let status = JobStatus::created(job_id, &update, time).ok_or_else(|| {
                    JobStatusError::JobNotFound {
                        job_id: job_id.clone(),
                    }
                })?;
                jobs.insert(job_id.clone(), status);
                Ok(())
            }
        }
    }

    async fn get_job(&self, job_id: &JobId) -> sediment_core::Result<Option<JobStatus>> {
        Ok(self.jobs.read().map_err(|_| poisoned())?.get(job_id).cloned())
    }

    async fn get_jobs_for_table(
        &self,
        table_id: &TableId,
    ) -> sediment_core::Result<Vec<JobStatus>> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|job| &job.table_id == table_id)
            .cloned()
            .collect())
    }
}

/// Waits until every job has finished or been rejected.
///
/// Unknown jobs count as unfinished. Giving up early is safe; the jobs carry on.
///
/// # Errors
///
/// Returns [`sediment_core::Error::Timeout`] if the poll budget runs out.
pub async fn wait_for_jobs_to_finish(
    store: &dyn JobStatusStore,
    job_ids: &[JobId],
    poll: &PollConfig,
) -> sediment_core::Result<()> {
    poll.poll_until("jobs to finish", || async move {
        for job_id in job_ids {
            match store.get_job(job_id).await? {
                Some(status) if status.is_finished() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    })
    .await
}
