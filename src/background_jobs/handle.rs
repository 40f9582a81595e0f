use super::job::{BackgroundJob, JobError, JobPriority};
use super::queue::{ErasedJob, Submitted};
use crate::job_store::{JobRun, JobRunStatus, JobRunStore};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Command sent to the scheduler.
pub(crate) enum SchedulerCommand {
    Submit {
        priority: JobPriority,
        seq: u64,
        run_id: Option<i64>,
        job: Box<dyn ErasedJob>,
    },
    StartBackgroundJobs {
        response: oneshot::Sender<bool>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub(crate) struct SharedJobState {
    /// Jobs submitted but not yet handed to a worker.
    pub queued: AtomicUsize,
    /// Jobs currently executing on a worker.
    pub running: AtomicUsize,
    next_seq: AtomicU64,
}

impl SharedJobState {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }
}

/// Handle to interact with the job scheduler.
///
/// Cheap to clone; every clone talks to the same scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::UnboundedSender<SchedulerCommand>,
    shared_state: Arc<SharedJobState>,
    job_store: Arc<dyn JobRunStore>,
}

impl SchedulerHandle {
    pub(crate) fn new(
        command_tx: mpsc::UnboundedSender<SchedulerCommand>,
        shared_state: Arc<SharedJobState>,
        job_store: Arc<dyn JobRunStore>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            job_store,
        }
    }

    /// Queue a job for execution on a background worker.
    ///
    /// Returns immediately. The job's result is delivered through the
    /// returned [`JobHandle`].
    pub fn submit<J: BackgroundJob>(&self, job: J) -> Result<JobHandle<J::Output>, JobError> {
        let priority = job.priority();
        let kind = job.kind();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let submitted = Submitted::new(job, outcome_tx);
        let name = submitted.name().to_string();

        // History is best effort, a store failure never blocks a job
        let run_id = match self.job_store.record_job_queued(&name, kind, priority) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record submission of {}: {}", name, e);
                None
            }
        };

        let seq = self.shared_state.next_seq();
        self.shared_state.queued.fetch_add(1, Ordering::SeqCst);

        let command = SchedulerCommand::Submit {
            priority,
            seq,
            run_id,
            job: Box::new(submitted),
        };
        if self.command_tx.send(command).is_err() {
            self.shared_state.queued.fetch_sub(1, Ordering::SeqCst);
            if let Some(run_id) = run_id {
                let _ = self.job_store.record_job_finish(
                    run_id,
                    JobRunStatus::Failed,
                    Some(JobError::SchedulerUnavailable.to_string()),
                );
            }
            return Err(JobError::SchedulerUnavailable);
        }

        debug!("Submitted job {} (priority {}, seq {})", name, priority, seq);

        Ok(JobHandle {
            name,
            outcome_rx,
        })
    }

    /// Allow the scheduler to start handing queued jobs to workers.
    ///
    /// Returns whether dispatching had already been started.
    pub async fn start_background_jobs(&self) -> Result<bool, JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::StartBackgroundJobs {
                response: response_tx,
            })
            .map_err(|_| JobError::SchedulerUnavailable)?;

        response_rx
            .await
            .map_err(|_| JobError::SchedulerUnavailable)
    }

    /// Number of jobs waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.shared_state.queued.load(Ordering::SeqCst)
    }

    /// Number of jobs currently executing.
    pub fn running_count(&self) -> usize {
        self.shared_state.running.load(Ordering::SeqCst)
    }

    /// Get execution history of a job instance, newest first.
    pub fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>> {
        self.job_store.get_job_history(job_name, limit)
    }

    /// Get the most recent runs of all jobs, newest first.
    pub fn get_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>> {
        self.job_store.get_recent_runs(limit)
    }
}

/// Receiving end of a submitted job's result.
pub struct JobHandle<R> {
    name: String,
    outcome_rx: oneshot::Receiver<Result<R, JobError>>,
}

impl<R> JobHandle<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the job to finish and take its result.
    pub async fn outcome(self) -> Result<R, JobError> {
        match self.outcome_rx.await {
            Ok(result) => result,
            Err(_) => Err(JobError::SchedulerUnavailable),
        }
    }
}

impl<R> std::fmt::Debug for JobHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("name", &self.name).finish()
    }
}
