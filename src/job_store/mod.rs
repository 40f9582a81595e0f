//! Durable record of background job runs.

mod models;
mod sqlite_job_store;

pub use models::{JobRun, JobRunStatus};
pub use sqlite_job_store::SqliteJobRunStore;

use anyhow::Result;

pub trait JobRunStore: Send + Sync {
    /// Record a newly submitted job. Returns the run id.
    fn record_job_queued(&self, job_name: &str, job_kind: &str, priority: i32) -> Result<i64>;
    fn record_job_start(&self, run_id: i64) -> Result<()>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_run(&self, run_id: i64) -> Result<Option<JobRun>>;
    /// Most recent runs of the named job instance first.
    fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>>;
    /// Most recent runs of all jobs first.
    fn get_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>>;
    /// Fail every run left queued or running by a previous process.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;
}
