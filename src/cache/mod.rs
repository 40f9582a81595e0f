//! Persistence of compiled modules.
//!
//! Background jobs only see the [`ModulePersistence`] trait. The cache format
//! belongs to the implementation; [`FileModuleCache`] is the bundled one.

mod file_cache;

pub use file_cache::{CacheEntry, FileModuleCache};

use crate::compiler::{CompiledModule, QualifiedName};
use thiserror::Error;

/// Errors reported by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error while persisting module {module}: {source}")]
    Io {
        module: QualifiedName,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize module {module}: {reason}")]
    Serialization {
        module: QualifiedName,
        reason: String,
    },
}

/// Writes a module's compiled representation to a durable cache.
///
/// Implementations must make each write atomic and must accept repeated
/// writes of the same module.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ModulePersistence: Send + Sync {
    /// Persist `module`.
    ///
    /// `use_global_cache` selects the global cache location instead of the
    /// project-local one. With `no_overwrite` set, an existing entry is kept
    /// and the call succeeds without writing.
    fn serialize_module(
        &self,
        module: &CompiledModule,
        use_global_cache: bool,
        no_overwrite: bool,
    ) -> Result<(), PersistenceError>;
}
