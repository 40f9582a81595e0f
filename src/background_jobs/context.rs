use crate::cache::ModulePersistence;
use crate::compiler::ModuleRegistry;
use crate::locking::Locking;
use std::sync::Arc;

/// Runtime configuration visible to jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Persist into the global cache location instead of the project-local one.
    pub use_global_cache: bool,
}

/// Context provided to jobs during execution.
///
/// One context is built at start-up and shared by every job run; it is not
/// owned by any job.
#[derive(Clone)]
pub struct JobContext {
    /// The process-wide compilation lock manager.
    pub locking: Arc<dyn Locking>,

    /// Lookup of loaded modules.
    pub modules: Arc<dyn ModuleRegistry>,

    /// Where compiled modules are written.
    pub persistence: Arc<dyn ModulePersistence>,

    pub settings: RuntimeSettings,
}

impl JobContext {
    /// Create a new job context with the given dependencies.
    pub fn new(
        locking: Arc<dyn Locking>,
        modules: Arc<dyn ModuleRegistry>,
        persistence: Arc<dyn ModulePersistence>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            locking,
            modules,
            persistence,
            settings,
        }
    }

    pub fn is_use_global_cache(&self) -> bool {
        self.settings.use_global_cache
    }
}
