//! Background job scheduling and execution system.
//!
//! Maintenance work such as persisting compiled modules is submitted to a
//! priority-ordered scheduler and executed on background workers, off the
//! interactive path.

mod context;
mod handle;
mod job;
pub mod jobs;
mod queue;
mod scheduler;

pub use context::{JobContext, RuntimeSettings};
pub use handle::{JobHandle, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobPriority};
pub use scheduler::{create_scheduler, JobScheduler, SchedulerOptions};
