//! Compiler-facing types consumed by the maintenance layer.
//!
//! The compiler itself lives elsewhere; this module only models what
//! background jobs need to know about it: module names, the ordered
//! compilation stages, and lookup of modules by name.

mod manifest;
mod module;
mod qualified_name;
mod stage;

pub use manifest::{ManifestModule, ModuleManifest};
pub use module::{CompiledModule, InMemoryModule, InMemoryModuleRegistry, Module, ModuleRegistry};
pub use qualified_name::{QualifiedName, QualifiedNameError};
pub use stage::{is_ready_for_persistence, CompilationStage, PERSISTENCE_THRESHOLD};
