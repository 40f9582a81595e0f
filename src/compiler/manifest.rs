//! TOML manifest describing the modules loaded into an [`InMemoryModuleRegistry`].
//!
//! ```toml
//! [[module]]
//! name = "Standard.Base.Data"
//! stage = "after_codegen"
//! ir = { bindings = ["map", "filter"] }
//! ```

use super::module::{InMemoryModule, InMemoryModuleRegistry};
use super::qualified_name::QualifiedName;
use super::stage::CompilationStage;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
pub struct ModuleManifest {
    #[serde(default, rename = "module")]
    pub modules: Vec<ManifestModule>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestModule {
    pub name: QualifiedName,
    pub stage: CompilationStage,
    #[serde(default)]
    pub ir: JsonValue,
}

impl ModuleManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read module manifest: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse module manifest: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Build a registry holding every module of the manifest.
    ///
    /// Fails if the same name is listed twice.
    pub fn into_registry(self) -> Result<InMemoryModuleRegistry> {
        let registry = InMemoryModuleRegistry::new();
        for entry in self.modules {
            let name = entry.name.clone();
            let module = InMemoryModule::new(entry.name, entry.stage, entry.ir);
            if registry.register(Arc::new(module)).is_some() {
                bail!("Module {} is listed more than once in the manifest", name);
            }
        }
        Ok(registry)
    }
}
