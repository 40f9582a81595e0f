use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::JobError;
use super::queue::{JobQueue, QueueEntry, RunOutcome};
use crate::job_store::{JobRunStatus, JobRunStore};
use crate::metrics;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tuning knobs for a [`JobScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Maximum number of jobs executing at the same time.
    pub worker_threads: usize,
    /// Dispatch queued jobs as soon as the scheduler runs.
    pub start_background_jobs: bool,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            start_background_jobs: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the job queue and hands jobs to background workers.
///
/// The scheduler loop is the only place where the next job is chosen:
/// always the queued job with the lowest priority value, oldest first among
/// equals.
pub struct JobScheduler {
    /// Jobs waiting for a worker.
    queue: JobQueue,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::UnboundedReceiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,

    /// Store for persisting job history.
    job_store: Arc<dyn JobRunStore>,

    /// Counters readable through SchedulerHandle.
    shared_state: Arc<SharedJobState>,

    /// One permit per worker.
    workers: Arc<Semaphore>,

    /// Tasks tracking jobs in flight.
    running: JoinSet<()>,

    dispatching: bool,

    options: SchedulerOptions,
}

impl JobScheduler {
    pub(crate) fn new(
        job_store: Arc<dyn JobRunStore>,
        command_receiver: mpsc::UnboundedReceiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<SharedJobState>,
        options: SchedulerOptions,
    ) -> Self {
        let worker_threads = options.worker_threads.max(1);
        Self {
            queue: JobQueue::default(),
            command_receiver,
            shutdown_token,
            job_context,
            job_store,
            shared_state,
            workers: Arc::new(Semaphore::new(worker_threads)),
            running: JoinSet::new(),
            dispatching: options.start_background_jobs,
            options,
        }
    }

    /// Number of jobs waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Fail runs left queued or running by a previous process.
    ///
    /// Must happen before the handle accepts submissions, or fresh runs
    /// would be caught too.
    fn mark_stale_runs(&self) {
        match self.job_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }
    }

    /// Main scheduler loop. Returns once the shutdown token is cancelled.
    pub async fn run(&mut self) {
        info!(
            "Starting job scheduler with {} workers (dispatching: {})",
            self.options.worker_threads.max(1),
            self.dispatching
        );

        loop {
            let can_dispatch = self.dispatching && !self.queue.is_empty();
            let workers = Arc::clone(&self.workers);

            // Commands are drained before dispatching so that a burst of
            // submissions is ordered by priority, not by arrival.
            tokio::select! {
                biased;

                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd);
                }
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    if let Err(e) = joined {
                        error!("Job task failed: {}", e);
                    }
                }
                permit = workers.acquire_owned(), if can_dispatch => {
                    match permit {
                        Ok(permit) => self.dispatch_next(permit),
                        Err(e) => {
                            error!("Worker pool closed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Handle a command from the SchedulerHandle.
    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Submit {
                priority,
                seq,
                run_id,
                job,
            } => {
                debug!("Queued job {} (priority {})", job.name(), priority);
                self.queue.push(QueueEntry {
                    priority,
                    seq,
                    run_id,
                    job,
                });
                metrics::set_background_jobs_queued(self.queue.len());
            }
            SchedulerCommand::StartBackgroundJobs { response } => {
                let was_dispatching = self.dispatching;
                if !was_dispatching {
                    info!(
                        "Starting background jobs with {} queued",
                        self.queue.len()
                    );
                }
                self.dispatching = true;
                let _ = response.send(was_dispatching);
            }
        }
    }

    /// Hand the most urgent queued job to a blocking worker.
    fn dispatch_next(&mut self, permit: OwnedSemaphorePermit) {
        let Some(entry) = self.queue.pop() else {
            return;
        };
        self.shared_state.queued.fetch_sub(1, Ordering::SeqCst);
        let running = self.shared_state.running.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_background_jobs_queued(self.queue.len());
        metrics::set_background_jobs_running(running);

        let QueueEntry {
            priority,
            run_id,
            job,
            ..
        } = entry;
        let job_name = job.name().to_string();
        let job_kind = job.kind();

        if let Some(run_id) = run_id {
            if let Err(e) = self.job_store.record_job_start(run_id) {
                error!("Failed to record job start for {}: {}", job_name, e);
            }
        }

        info!(
            "Starting job: {} (priority: {}, run_id: {:?})",
            job_name, priority, run_id
        );

        let ctx = self.job_context.clone();
        let job_store = Arc::clone(&self.job_store);
        let shared_state = Arc::clone(&self.shared_state);

        self.running.spawn(async move {
            // Held until the job is done, freeing the worker slot afterwards
            let _permit = permit;
            let start_time = Instant::now();

            // Jobs are synchronous, keep them off the async runtime threads
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => RunOutcome::Panicked(format!("Task failure: {}", e)),
            };

            let (status, error_msg) = match &outcome {
                RunOutcome::Completed => {
                    info!("Job {} completed successfully in {:?}", job_name, elapsed);
                    (JobRunStatus::Completed, None)
                }
                RunOutcome::Failed(msg) => {
                    error!("Job {} failed after {:?}: {}", job_name, elapsed, msg);
                    (JobRunStatus::Failed, Some(msg.clone()))
                }
                RunOutcome::Panicked(msg) => {
                    error!("Job {} panicked after {:?}: {}", job_name, elapsed, msg);
                    (JobRunStatus::Failed, Some(format!("Job panicked: {}", msg)))
                }
            };

            metrics::record_background_job_execution(job_kind, outcome.status_label(), elapsed);
            let running = shared_state.running.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics::set_background_jobs_running(running);

            if let Some(run_id) = run_id {
                if let Err(e) = job_store.record_job_finish(run_id, status, error_msg) {
                    error!("Failed to record job finish for {}: {}", job_name, e);
                }
            }
        });
    }

    /// Fail a job that will never run.
    fn abandon(&self, entry: QueueEntry) {
        self.shared_state.queued.fetch_sub(1, Ordering::SeqCst);
        debug!("Abandoning queued job {}", entry.job.name());

        if let Some(run_id) = entry.run_id {
            if let Err(e) = self.job_store.record_job_finish(
                run_id,
                JobRunStatus::Failed,
                Some(JobError::SchedulerShutdown.to_string()),
            ) {
                error!(
                    "Failed to record abandoned job {}: {}",
                    entry.job.name(),
                    e
                );
            }
        }

        entry.job.abandon(JobError::SchedulerShutdown);
    }

    /// Gracefully shut down the scheduler.
    ///
    /// Queued jobs never start. Jobs already on a worker are not interrupted
    /// and are awaited up to the configured timeout.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        // Refuse new submissions, then pick up whatever was already sent
        self.command_receiver.close();
        while let Ok(cmd) = self.command_receiver.try_recv() {
            match cmd {
                SchedulerCommand::Submit {
                    priority,
                    seq,
                    run_id,
                    job,
                } => self.queue.push(QueueEntry {
                    priority,
                    seq,
                    run_id,
                    job,
                }),
                SchedulerCommand::StartBackgroundJobs { response } => {
                    let _ = response.send(self.dispatching);
                }
            }
        }

        let abandoned = self.queue.drain();
        if !abandoned.is_empty() {
            warn!("Abandoning {} queued jobs", abandoned.len());
        }
        for entry in abandoned {
            self.abandon(entry);
        }
        metrics::set_background_jobs_queued(0);

        let in_flight = self.running.len();
        if in_flight > 0 {
            info!("Waiting for {} running jobs to complete...", in_flight);
        }
        let running = &mut self.running;
        let wait_all = async {
            while let Some(joined) = running.join_next().await {
                if let Err(e) = joined {
                    error!("Job task failed: {}", e);
                }
            }
        };
        if tokio::time::timeout(self.options.shutdown_timeout, wait_all)
            .await
            .is_err()
        {
            warn!(
                "{} jobs still running after {:?}, detaching them",
                self.running.len(),
                self.options.shutdown_timeout
            );
            self.running.detach_all();
        }

        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    job_store: Arc<dyn JobRunStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
    options: SchedulerOptions,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let shared_state = Arc::new(SharedJobState::default());

    let scheduler = JobScheduler::new(
        job_store.clone(),
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
        options,
    );
    scheduler.mark_stale_runs();

    let handle = SchedulerHandle::new(command_tx, shared_state, job_store);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::RuntimeSettings;
    use crate::background_jobs::job::{BackgroundJob, JobPriority};
    use crate::cache::MockModulePersistence;
    use crate::compiler::InMemoryModuleRegistry;
    use crate::job_store::SqliteJobRunStore;
    use crate::locking::CompilationLockManager;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Test job implementation
    struct TestJob {
        label: &'static str,
        priority: JobPriority,
        execution_log: Arc<Mutex<Vec<&'static str>>>,
        should_fail: Arc<AtomicBool>,
    }

    impl BackgroundJob for TestJob {
        type Output = &'static str;

        fn kind(&self) -> &'static str {
            "test"
        }

        fn name(&self) -> String {
            format!("TestJob({})", self.label)
        }

        fn priority(&self) -> JobPriority {
            self.priority
        }

        fn run(&self, _ctx: &JobContext) -> Result<&'static str, JobError> {
            self.execution_log.lock().unwrap().push(self.label);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(self.label)
            }
        }
    }

    struct PanickingJob;

    impl BackgroundJob for PanickingJob {
        type Output = ();

        fn kind(&self) -> &'static str {
            "panicking"
        }

        fn priority(&self) -> JobPriority {
            0
        }

        fn run(&self, _ctx: &JobContext) -> Result<(), JobError> {
            panic!("job exploded");
        }
    }

    struct CountingJob {
        counter: Arc<AtomicUsize>,
    }

    impl BackgroundJob for CountingJob {
        type Output = usize;

        fn kind(&self) -> &'static str {
            "counting"
        }

        fn priority(&self) -> JobPriority {
            10
        }

        fn run(&self, _ctx: &JobContext) -> Result<usize, JobError> {
            Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn test_context() -> JobContext {
        JobContext::new(
            Arc::new(CompilationLockManager::new()),
            Arc::new(InMemoryModuleRegistry::new()),
            Arc::new(MockModulePersistence::new()),
            RuntimeSettings::default(),
        )
    }

    fn create_test_scheduler(
        options: SchedulerOptions,
    ) -> (JobScheduler, SchedulerHandle, CancellationToken, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let job_store = Arc::new(SqliteJobRunStore::new(&db_path).unwrap());
        let shutdown_token = CancellationToken::new();

        let (scheduler, handle) =
            create_scheduler(job_store, shutdown_token.clone(), test_context(), options);

        (scheduler, handle, shutdown_token, temp_dir)
    }

    fn single_worker_gated() -> SchedulerOptions {
        SchedulerOptions {
            worker_threads: 1,
            start_background_jobs: false,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    fn test_job(
        label: &'static str,
        priority: JobPriority,
        execution_log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> TestJob {
        TestJob {
            label,
            priority,
            execution_log: Arc::clone(execution_log),
            should_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_jobs_run_in_priority_order() {
        let (mut scheduler, handle, shutdown_token, _temp_dir) =
            create_test_scheduler(single_worker_gated());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles = vec![
            handle.submit(test_job("a", 5, &log)).unwrap(),
            handle.submit(test_job("b", 1, &log)).unwrap(),
            handle.submit(test_job("c", 5, &log)).unwrap(),
            handle.submit(test_job("d", 3, &log)).unwrap(),
        ];
        assert_eq!(handle.queued_count(), 4);

        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        assert!(!handle.start_background_jobs().await.unwrap());
        for job_handle in handles {
            job_handle.outcome().await.unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec!["b", "d", "a", "c"]);
        assert_eq!(handle.queued_count(), 0);

        shutdown_token.cancel();
        scheduler_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_holds_jobs_until_started() {
        let (mut scheduler, handle, shutdown_token, _temp_dir) =
            create_test_scheduler(single_worker_gated());
        let counter = Arc::new(AtomicUsize::new(0));

        let job_handle = handle
            .submit(CountingJob {
                counter: Arc::clone(&counter),
            })
            .unwrap();
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(handle.queued_count(), 1);

        assert!(!handle.start_background_jobs().await.unwrap());
        assert_eq!(job_handle.outcome().await.unwrap(), 1);

        // Starting again reports that dispatching was already on
        assert!(handle.start_background_jobs().await.unwrap());

        shutdown_token.cancel();
        scheduler_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_other_jobs() {
        let (mut scheduler, handle, shutdown_token, _temp_dir) =
            create_test_scheduler(SchedulerOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let failing = test_job("failing", 1, &log);
        failing.should_fail.store(true, Ordering::SeqCst);

        let failing_handle = handle.submit(failing).unwrap();
        let panicking_handle = handle.submit(PanickingJob).unwrap();
        let ok_handle = handle.submit(test_job("ok", 2, &log)).unwrap();

        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        assert!(matches!(
            failing_handle.outcome().await,
            Err(JobError::ExecutionFailed(_))
        ));
        match panicking_handle.outcome().await {
            Err(JobError::Panicked(msg)) => assert_eq!(msg, "job exploded"),
            other => panic!("expected panic error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(ok_handle.outcome().await.unwrap(), "ok");

        shutdown_token.cancel();
        scheduler_task.await.unwrap();

        let failed = handle.get_job_history("TestJob(failing)", 10).unwrap();
        assert_eq!(failed[0].status, JobRunStatus::Failed);
        assert_eq!(
            failed[0].error_message.as_deref(),
            Some("Execution failed: Test failure")
        );

        let panicked = handle.get_job_history("panicking", 10).unwrap();
        assert_eq!(panicked[0].status, JobRunStatus::Failed);
        assert!(panicked[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("job exploded"));

        let ok = handle.get_job_history("TestJob(ok)", 10).unwrap();
        assert_eq!(ok[0].status, JobRunStatus::Completed);
        assert!(ok[0].started_at.is_some());
        assert!(ok[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_each_submission_runs_once() {
        let (mut scheduler, handle, shutdown_token, _temp_dir) =
            create_test_scheduler(SchedulerOptions {
                worker_threads: 4,
                ..SchedulerOptions::default()
            });
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        let handles: Vec<_> = (0..10)
            .map(|_| {
                handle
                    .submit(CountingJob {
                        counter: Arc::clone(&counter),
                    })
                    .unwrap()
            })
            .collect();
        for job_handle in handles {
            job_handle.outcome().await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(handle.get_job_history("counting", 100).unwrap().len(), 10);
        assert_eq!(handle.running_count(), 0);

        shutdown_token.cancel();
        scheduler_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queued_jobs() {
        let (mut scheduler, handle, shutdown_token, _temp_dir) =
            create_test_scheduler(single_worker_gated());
        let counter = Arc::new(AtomicUsize::new(0));

        let job_handle = handle
            .submit(CountingJob {
                counter: Arc::clone(&counter),
            })
            .unwrap();

        shutdown_token.cancel();
        scheduler.run().await;

        assert!(matches!(
            job_handle.outcome().await,
            Err(JobError::SchedulerShutdown)
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(handle.queued_count(), 0);

        let history = handle.get_job_history("counting", 10).unwrap();
        assert_eq!(history[0].status, JobRunStatus::Failed);

        assert!(matches!(
            handle.submit(CountingJob { counter }),
            Err(JobError::SchedulerUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_stale_runs_are_failed_on_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let stale_id = {
            let store = SqliteJobRunStore::new(&db_path).unwrap();
            let id = store.record_job_queued("stale", "test", 1).unwrap();
            store.record_job_start(id).unwrap();
            id
        };

        let job_store = Arc::new(SqliteJobRunStore::new(&db_path).unwrap());
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, _handle) = create_scheduler(
            job_store.clone(),
            shutdown_token.clone(),
            test_context(),
            SchedulerOptions::default(),
        );

        shutdown_token.cancel();
        scheduler.run().await;

        let run = job_store.get_run(stale_id).unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Failed);
    }
}
