//! Test environment: module registry, cache, scheduler and instrumented
//! lock manager wired together the way the binary wires them.

use super::doubles::{RecordingLocking, RecordingPersistence};
use compiler_maintenance::background_jobs::{
    create_scheduler, JobContext, RuntimeSettings, SchedulerHandle, SchedulerOptions,
};
use compiler_maintenance::cache::{FileModuleCache, ModulePersistence};
use compiler_maintenance::compiler::{
    CompilationStage, InMemoryModule, InMemoryModuleRegistry, QualifiedName,
};
use compiler_maintenance::job_store::SqliteJobRunStore;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn module_name(name: &str) -> QualifiedName {
    name.parse().expect("valid qualified name")
}

/// Scheduler options with `worker_threads` workers, dispatching right away.
pub fn workers(worker_threads: usize) -> SchedulerOptions {
    SchedulerOptions {
        worker_threads,
        start_background_jobs: true,
        shutdown_timeout: Duration::from_secs(10),
    }
}

/// Single worker that waits for `start_background_jobs`.
pub fn gated_single_worker() -> SchedulerOptions {
    SchedulerOptions {
        worker_threads: 1,
        start_background_jobs: false,
        shutdown_timeout: Duration::from_secs(10),
    }
}

/// A running scheduler over a temporary cache directory.
pub struct TestEnv {
    pub locking: Arc<RecordingLocking>,
    pub registry: Arc<InMemoryModuleRegistry>,
    pub persistence: Arc<RecordingPersistence>,
    pub cache: Arc<FileModuleCache>,
    pub handle: SchedulerHandle,
    /// Ordered log shared by persistence calls and test jobs.
    pub events: Arc<Mutex<Vec<String>>>,
    pub use_global_cache: bool,
    shutdown_token: CancellationToken,
    scheduler_task: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestEnv {
    /// Spawn with the local cache selected.
    pub fn spawn(options: SchedulerOptions) -> Self {
        Self::spawn_with(options, false)
    }

    pub fn spawn_with(options: SchedulerOptions, use_global_cache: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let locking = Arc::new(RecordingLocking::new());
        let registry = Arc::new(InMemoryModuleRegistry::new());
        let cache = Arc::new(FileModuleCache::new(
            temp_dir.path().join("global"),
            temp_dir.path().join("local"),
        ));
        let events = Arc::new(Mutex::new(Vec::new()));
        let persistence = Arc::new(RecordingPersistence::new(
            locking.clone(),
            Some(cache.clone() as Arc<dyn ModulePersistence>),
            Arc::clone(&events),
        ));

        let job_store = Arc::new(
            SqliteJobRunStore::new(temp_dir.path().join("jobs.db"))
                .expect("Failed to create job store"),
        );

        let job_context = JobContext::new(
            locking.clone(),
            registry.clone(),
            persistence.clone(),
            RuntimeSettings { use_global_cache },
        );

        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) =
            create_scheduler(job_store, shutdown_token.clone(), job_context, options);
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        Self {
            locking,
            registry,
            persistence,
            cache,
            handle,
            events,
            use_global_cache,
            shutdown_token,
            scheduler_task,
            _temp_dir: temp_dir,
        }
    }

    /// Load a module at `stage` with a small IR derived from its name.
    pub fn register_module(&self, name: &str, stage: CompilationStage) -> Arc<InMemoryModule> {
        let module = Arc::new(InMemoryModule::new(
            module_name(name),
            stage,
            json!({ "module": name, "bindings": ["main"] }),
        ));
        self.registry.register(Arc::clone(&module));
        module
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Stop the scheduler and wait for its loop to exit.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        self.scheduler_task
            .await
            .expect("scheduler task panicked");
    }
}
