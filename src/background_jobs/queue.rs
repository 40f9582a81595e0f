//! Priority queue of submitted jobs.
//!
//! Jobs of different output types share one queue, so each submission is
//! stored behind the object-safe [`ErasedJob`] trait together with the
//! channel that delivers its typed outcome.

use super::context::JobContext;
use super::job::{BackgroundJob, JobError, JobPriority};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::oneshot;

/// Summary of one run, as recorded by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

impl RunOutcome {
    pub(crate) fn status_label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "success",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Panicked(_) => "panic",
        }
    }
}

pub(crate) trait ErasedJob: Send {
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str;

    /// Run the job and deliver its result to the submitter.
    fn execute(self: Box<Self>, ctx: &JobContext) -> RunOutcome;

    /// Deliver `error` to the submitter without running the job.
    fn abandon(self: Box<Self>, error: JobError);
}

pub(crate) struct Submitted<J: BackgroundJob> {
    job: J,
    name: String,
    outcome_tx: oneshot::Sender<Result<J::Output, JobError>>,
}

impl<J: BackgroundJob> Submitted<J> {
    pub(crate) fn new(
        job: J,
        outcome_tx: oneshot::Sender<Result<J::Output, JobError>>,
    ) -> Self {
        let name = job.name();
        Self {
            job,
            name,
            outcome_tx,
        }
    }
}

impl<J: BackgroundJob> ErasedJob for Submitted<J> {
    fn kind(&self) -> &'static str {
        self.job.kind()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self: Box<Self>, ctx: &JobContext) -> RunOutcome {
        let this = *self;
        let result = match catch_unwind(AssertUnwindSafe(|| this.job.run(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        };

        let outcome = match &result {
            Ok(_) => RunOutcome::Completed,
            Err(JobError::Panicked(msg)) => RunOutcome::Panicked(msg.clone()),
            Err(e) => RunOutcome::Failed(e.to_string()),
        };

        // The submitter may have dropped its handle already
        let _ = this.outcome_tx.send(result);
        outcome
    }

    fn abandon(self: Box<Self>, error: JobError) {
        let _ = self.outcome_tx.send(Err(error));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) struct QueueEntry {
    pub priority: JobPriority,
    /// Submission sequence number, breaks ties between equal priorities.
    pub seq: u64,
    /// Row in the job run store, if recording succeeded.
    pub run_id: Option<i64>,
    pub job: Box<dyn ErasedJob>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap pops the greatest entry: lowest priority value first, then
    // earliest submission.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct JobQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl JobQueue {
    pub(crate) fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    /// Remove the most urgent entry.
    pub(crate) fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<QueueEntry> {
        self.heap.drain().collect()
    }
}
