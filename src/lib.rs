//! Background maintenance for a compiler runtime.
//!
//! Compiled modules are persisted to a cache by background jobs that run off
//! the interactive path, ordered by priority and serialized against other
//! compiler state mutations through a single write compilation lock.

pub mod background_jobs;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod job_store;
pub mod locking;
pub mod metrics;

// Re-export commonly used types for convenience
pub use background_jobs::jobs::SerializeModuleJob;
pub use background_jobs::{create_scheduler, JobContext, SchedulerHandle};
pub use cache::{FileModuleCache, ModulePersistence};
pub use job_store::{JobRunStore, SqliteJobRunStore};
pub use locking::{CompilationLockManager, Locking};
