//! Mutual exclusion over compiler-mutable state.
//!
//! There is a single write compilation lock per process. Every operation
//! that mutates compiler or module state, whether it comes from a background
//! job or from the interactive path, coordinates through it.

mod guard;

pub use guard::{
    with_read_compilation_lock, with_write_compilation_lock, ReadCompilationLockGuard,
    WriteCompilationLockGuard,
};

use crate::metrics;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::trace;

/// Acquisition and release of the compilation locks.
///
/// Acquire and release are separate calls so that implementations can be
/// shared across threads and replaced by test doubles. Prefer the scoped
/// guards in this module over calling them directly.
pub trait Locking: Send + Sync {
    /// Block until the write compilation lock is exclusively held by the
    /// caller. Returns the acquisition time.
    fn acquire_write_compilation_lock(&self) -> Instant;

    /// Release the write compilation lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    fn release_write_compilation_lock(&self);

    /// Block until shared read access is granted. Readers exclude the writer.
    fn acquire_read_compilation_lock(&self) -> Instant;

    /// Release one read acquisition.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds no read lock.
    fn release_read_compilation_lock(&self);

    /// Whether any thread holds the write compilation lock.
    fn is_write_compilation_lock_held(&self) -> bool;

    /// Whether the calling thread holds the write compilation lock.
    fn is_write_compilation_lock_held_by_current_thread(&self) -> bool;
}

#[derive(Debug, Default)]
struct CompilationLockState {
    writer: Option<ThreadId>,
    /// Read acquisitions per thread.
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
}

/// Process-wide compilation lock manager.
///
/// Waiting writers block new readers, so a stream of interactive reads
/// cannot starve maintenance writes. No order is promised among writers.
///
/// Locks are owned by the thread that acquired them. Releasing from another
/// thread, re-acquiring the write lock and upgrading a read lock to the
/// write lock all panic. A thread already holding a read lock may take it
/// again even while writers wait.
#[derive(Debug, Default)]
pub struct CompilationLockManager {
    state: Mutex<CompilationLockState>,
    released: Condvar,
}

impl CompilationLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, CompilationLockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        state: MutexGuard<'a, CompilationLockState>,
    ) -> MutexGuard<'a, CompilationLockState> {
        self.released
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of threads currently holding a read lock.
    pub fn reader_count(&self) -> usize {
        self.lock_state().readers.len()
    }
}

impl Locking for CompilationLockManager {
    fn acquire_write_compilation_lock(&self) -> Instant {
        let wait_started = Instant::now();
        let current = thread::current().id();

        let mut state = self.lock_state();
        if state.writer == Some(current) {
            drop(state);
            panic!("write compilation lock re-acquired by the thread holding it ({current:?})");
        }
        if state.readers.contains_key(&current) {
            drop(state);
            panic!("write compilation lock requested by a thread holding a read lock ({current:?})");
        }

        state.waiting_writers += 1;
        while state.writer.is_some() || !state.readers.is_empty() {
            state = self.wait(state);
        }
        state.waiting_writers -= 1;
        state.writer = Some(current);
        drop(state);

        let waited = wait_started.elapsed();
        metrics::record_write_lock_wait(waited);
        trace!("Acquired write compilation lock after {:?}", waited);
        Instant::now()
    }

    fn release_write_compilation_lock(&self) {
        let current = thread::current().id();

        let mut state = self.lock_state();
        if state.writer != Some(current) {
            let owner = state.writer;
            drop(state);
            panic!(
                "write compilation lock released without a matching acquisition by {current:?} (owner: {owner:?})"
            );
        }
        state.writer = None;
        drop(state);
        self.released.notify_all();
    }

    fn acquire_read_compilation_lock(&self) -> Instant {
        let current = thread::current().id();

        let mut state = self.lock_state();
        if state.writer == Some(current) {
            drop(state);
            panic!("read compilation lock requested by the thread holding the write lock ({current:?})");
        }

        // Nested reads skip the writer preference, the outer read already
        // keeps writers out.
        if let Some(count) = state.readers.get_mut(&current) {
            *count += 1;
            return Instant::now();
        }

        while state.writer.is_some() || state.waiting_writers > 0 {
            state = self.wait(state);
        }
        state.readers.insert(current, 1);
        Instant::now()
    }

    fn release_read_compilation_lock(&self) {
        let current = thread::current().id();

        let mut state = self.lock_state();
        let Some(count) = state.readers.get_mut(&current) else {
            drop(state);
            panic!("read compilation lock released without a matching acquisition by {current:?}");
        };
        *count -= 1;
        if *count == 0 {
            state.readers.remove(&current);
        }
        let last_reader = state.readers.is_empty();
        drop(state);
        if last_reader {
            self.released.notify_all();
        }
    }

    fn is_write_compilation_lock_held(&self) -> bool {
        self.lock_state().writer.is_some()
    }

    fn is_write_compilation_lock_held_by_current_thread(&self) -> bool {
        self.lock_state().writer == Some(thread::current().id())
    }
}
