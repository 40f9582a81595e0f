//! Instrumented implementations of the compiler-facing traits

use compiler_maintenance::cache::{ModulePersistence, PersistenceError};
use compiler_maintenance::compiler::{CompiledModule, QualifiedName};
use compiler_maintenance::locking::{CompilationLockManager, Locking};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lock manager that counts acquisitions and tracks how many holders of the
/// write lock exist at the same time.
#[derive(Default)]
pub struct RecordingLocking {
    inner: CompilationLockManager,
    holders: AtomicUsize,
    max_holders: AtomicUsize,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

impl RecordingLocking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous write lock holders observed.
    pub fn max_holders(&self) -> usize {
        self.max_holders.load(Ordering::SeqCst)
    }
}

impl Locking for RecordingLocking {
    fn acquire_write_compilation_lock(&self) -> Instant {
        let acquired_at = self.inner.acquire_write_compilation_lock();
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_holders.fetch_max(holders, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        acquired_at
    }

    fn release_write_compilation_lock(&self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release_write_compilation_lock();
    }

    fn acquire_read_compilation_lock(&self) -> Instant {
        self.inner.acquire_read_compilation_lock()
    }

    fn release_read_compilation_lock(&self) {
        self.inner.release_read_compilation_lock();
    }

    fn is_write_compilation_lock_held(&self) -> bool {
        self.inner.is_write_compilation_lock_held()
    }

    fn is_write_compilation_lock_held_by_current_thread(&self) -> bool {
        self.inner.is_write_compilation_lock_held_by_current_thread()
    }
}

/// One call to [`ModulePersistence::serialize_module`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersistCall {
    pub module: QualifiedName,
    pub use_global_cache: bool,
    pub no_overwrite: bool,
    /// Whether the calling thread held the write compilation lock.
    pub lock_held: bool,
}

/// Persistence backend that records every call, optionally delegating to a
/// real backend.
pub struct RecordingPersistence {
    locking: Arc<dyn Locking>,
    inner: Option<Arc<dyn ModulePersistence>>,
    calls: Mutex<Vec<PersistCall>>,
    events: Arc<Mutex<Vec<String>>>,
    fail_writes: AtomicBool,
    write_delay: Mutex<Duration>,
}

impl RecordingPersistence {
    pub fn new(
        locking: Arc<dyn Locking>,
        inner: Option<Arc<dyn ModulePersistence>>,
        events: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            locking,
            inner,
            calls: Mutex::new(Vec::new()),
            events,
            fail_writes: AtomicBool::new(false),
            write_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn calls(&self) -> Vec<PersistCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Make every following write fail with an IO error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }
}

impl ModulePersistence for RecordingPersistence {
    fn serialize_module(
        &self,
        module: &CompiledModule,
        use_global_cache: bool,
        no_overwrite: bool,
    ) -> Result<(), PersistenceError> {
        self.calls.lock().unwrap().push(PersistCall {
            module: module.name.clone(),
            use_global_cache,
            no_overwrite,
            lock_held: self.locking.is_write_compilation_lock_held_by_current_thread(),
        });
        self.events
            .lock()
            .unwrap()
            .push(format!("serialize:{}", module.name));

        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                module: module.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated disk failure"),
            });
        }

        match &self.inner {
            Some(inner) => inner.serialize_module(module, use_global_cache, no_overwrite),
            None => Ok(()),
        }
    }
}
