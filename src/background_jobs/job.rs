use super::context::JobContext;
use crate::cache::PersistenceError;
use thiserror::Error;

/// Job priority. Lower values are more urgent.
pub type JobPriority = i32;

/// Errors that can occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Scheduler not available")]
    SchedulerUnavailable,

    #[error("Scheduler shut down before the job ran")]
    SchedulerShutdown,
}

/// Trait for background jobs.
///
/// Jobs are executed synchronously on a blocking worker thread, never on the
/// thread that submitted them, and no assumption can be made about which
/// worker runs them. Each submitted instance runs at most once.
pub trait BackgroundJob: Send + Sync + 'static {
    /// Value produced by a successful run.
    type Output: Send + 'static;

    /// Identifier of the job type, shared by all instances.
    ///
    /// Used as the metrics label, so it must not embed per-instance data.
    fn kind(&self) -> &'static str;

    /// Human-readable description of this instance for logs and history.
    fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Fixed priority of this job, lower is more urgent.
    fn priority(&self) -> JobPriority;

    /// Execute the job.
    ///
    /// An `Err` is recorded against this job instance only; it never affects
    /// other queued or running jobs.
    fn run(&self, ctx: &JobContext) -> Result<Self::Output, JobError>;
}
