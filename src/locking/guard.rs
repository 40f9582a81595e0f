use super::Locking;
use crate::metrics;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::trace;

/// Scoped ownership of the write compilation lock.
///
/// The lock is released exactly once when the guard is dropped, including
/// while unwinding from a panic. The lock belongs to the acquiring thread,
/// so the guard cannot be sent to another one.
///
/// ```compile_fail
/// use compiler_maintenance::locking::{CompilationLockManager, WriteCompilationLockGuard};
///
/// fn assert_send<T: Send>(_: T) {}
///
/// let manager = CompilationLockManager::new();
/// assert_send(WriteCompilationLockGuard::acquire(&manager, "doc"));
/// ```
#[must_use = "the write compilation lock is released as soon as the guard is dropped"]
pub struct WriteCompilationLockGuard<'a> {
    locking: &'a dyn Locking,
    holder: String,
    acquired_at: Instant,
    _not_send: PhantomData<*const ()>,
}

impl<'a> WriteCompilationLockGuard<'a> {
    /// Block until the write compilation lock is acquired.
    ///
    /// `holder` names the caller in the hold-time diagnostics.
    pub fn acquire(locking: &'a dyn Locking, holder: impl Into<String>) -> Self {
        let acquired_at = locking.acquire_write_compilation_lock();
        Self {
            locking,
            holder: holder.into(),
            acquired_at,
            _not_send: PhantomData,
        }
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for WriteCompilationLockGuard<'_> {
    fn drop(&mut self) {
        self.locking.release_write_compilation_lock();
        let held = self.held_for();
        metrics::record_write_lock_hold(held);
        trace!(
            "Kept write compilation lock [{}] for {} milliseconds",
            self.holder,
            held.as_millis()
        );
    }
}

/// Scoped shared access to compiler state.
#[must_use = "the read compilation lock is released as soon as the guard is dropped"]
pub struct ReadCompilationLockGuard<'a> {
    locking: &'a dyn Locking,
    acquired_at: Instant,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReadCompilationLockGuard<'a> {
    pub fn acquire(locking: &'a dyn Locking) -> Self {
        let acquired_at = locking.acquire_read_compilation_lock();
        Self {
            locking,
            acquired_at,
            _not_send: PhantomData,
        }
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

impl Drop for ReadCompilationLockGuard<'_> {
    fn drop(&mut self) {
        self.locking.release_read_compilation_lock();
    }
}

/// Run `f` while holding the write compilation lock.
pub fn with_write_compilation_lock<R>(
    locking: &dyn Locking,
    holder: &str,
    f: impl FnOnce() -> R,
) -> R {
    let _guard = WriteCompilationLockGuard::acquire(locking, holder);
    f()
}

/// Run `f` while holding a read compilation lock.
pub fn with_read_compilation_lock<R>(locking: &dyn Locking, f: impl FnOnce() -> R) -> R {
    let _guard = ReadCompilationLockGuard::acquire(locking);
    f()
}
