use super::qualified_name::QualifiedName;
use super::stage::CompilationStage;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Snapshot of a module's in-memory compiled representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub name: QualifiedName,
    pub stage: CompilationStage,
    pub ir: JsonValue,
}

/// A module known to the runtime.
pub trait Module: Send + Sync {
    fn name(&self) -> &QualifiedName;

    /// Current position of the module in the compiler pipeline.
    fn compilation_stage(&self) -> CompilationStage;

    fn compiled_representation(&self) -> CompiledModule;
}

/// Lookup of modules by qualified name.
pub trait ModuleRegistry: Send + Sync {
    /// Returns `None` when no module with that name is loaded, which is a
    /// normal outcome rather than an error.
    fn find_module_by_name(&self, name: &QualifiedName) -> Option<Arc<dyn Module>>;
}

#[derive(Debug)]
struct ModuleState {
    stage: CompilationStage,
    ir: JsonValue,
}

/// Module held entirely in memory.
///
/// Stage and IR are updated by whoever drives compilation; stage updates are
/// monotonic unless [`InMemoryModule::reset`] is called.
#[derive(Debug)]
pub struct InMemoryModule {
    name: QualifiedName,
    state: RwLock<ModuleState>,
}

impl InMemoryModule {
    pub fn new(name: QualifiedName, stage: CompilationStage, ir: JsonValue) -> Self {
        Self {
            name,
            state: RwLock::new(ModuleState { stage, ir }),
        }
    }

    /// Move the module forward to `stage`.
    ///
    /// Returns `false` and leaves the module untouched if `stage` would be a
    /// regression.
    pub fn advance_to(&self, stage: CompilationStage) -> bool {
        let mut state = self.state.write().unwrap();
        if stage.is_before(state.stage) {
            return false;
        }
        state.stage = stage;
        true
    }

    /// Replace the IR and move to `stage` in one step.
    pub fn update(&self, stage: CompilationStage, ir: JsonValue) -> bool {
        let mut state = self.state.write().unwrap();
        if stage.is_before(state.stage) {
            return false;
        }
        state.stage = stage;
        state.ir = ir;
        true
    }

    /// Explicit recompilation reset: back to `Initial` with an empty IR.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.stage = CompilationStage::Initial;
        state.ir = JsonValue::Null;
    }
}

impl Module for InMemoryModule {
    fn name(&self) -> &QualifiedName {
        &self.name
    }

    fn compilation_stage(&self) -> CompilationStage {
        self.state.read().unwrap().stage
    }

    fn compiled_representation(&self) -> CompiledModule {
        let state = self.state.read().unwrap();
        CompiledModule {
            name: self.name.clone(),
            stage: state.stage,
            ir: state.ir.clone(),
        }
    }
}

/// Registry backed by a map of [`InMemoryModule`]s.
#[derive(Debug, Default)]
pub struct InMemoryModuleRegistry {
    modules: RwLock<HashMap<QualifiedName, Arc<InMemoryModule>>>,
}

impl InMemoryModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, returning the one it replaced, if any.
    pub fn register(&self, module: Arc<InMemoryModule>) -> Option<Arc<InMemoryModule>> {
        let name = module.name().clone();
        self.modules.write().unwrap().insert(name, module)
    }

    pub fn remove(&self, name: &QualifiedName) -> Option<Arc<InMemoryModule>> {
        self.modules.write().unwrap().remove(name)
    }

    /// Typed access to a registered module.
    pub fn module(&self, name: &QualifiedName) -> Option<Arc<InMemoryModule>> {
        self.modules.read().unwrap().get(name).cloned()
    }

    /// Names of all registered modules, sorted.
    pub fn module_names(&self) -> Vec<QualifiedName> {
        let mut names: Vec<_> = self.modules.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleRegistry for InMemoryModuleRegistry {
    fn find_module_by_name(&self, name: &QualifiedName) -> Option<Arc<dyn Module>> {
        self.module(name).map(|m| m as Arc<dyn Module>)
    }
}
