use super::{ModulePersistence, PersistenceError};
use crate::compiler::{CompilationStage, CompiledModule, QualifiedName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// File extension of cache entries.
const ENTRY_EXTENSION: &str = "ir.json";

/// On-disk content of one cached module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: QualifiedName,
    pub stage: CompilationStage,
    /// Hex SHA-256 of the serialized IR.
    pub digest: String,
    pub written_at: DateTime<Utc>,
    pub ir: JsonValue,
}

/// Module cache stored as JSON files under a global and a local root.
///
/// `Standard.Base.Data` is stored at `<root>/Standard/Base/Data.ir.json`.
#[derive(Debug, Clone)]
pub struct FileModuleCache {
    global_root: PathBuf,
    local_root: PathBuf,
}

impl FileModuleCache {
    pub fn new(global_root: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            global_root: global_root.into(),
            local_root: local_root.into(),
        }
    }

    pub fn root(&self, use_global_cache: bool) -> &Path {
        if use_global_cache {
            &self.global_root
        } else {
            &self.local_root
        }
    }

    pub fn entry_path(&self, name: &QualifiedName, use_global_cache: bool) -> PathBuf {
        let mut path = self.root(use_global_cache).to_path_buf();
        for segment in name.path() {
            path.push(segment);
        }
        path.push(format!("{}.{}", name.item(), ENTRY_EXTENSION));
        path
    }

    /// Read a cached entry back, `None` if the module was never persisted.
    pub fn load_entry(
        &self,
        name: &QualifiedName,
        use_global_cache: bool,
    ) -> Result<Option<CacheEntry>, PersistenceError> {
        let path = self.entry_path(name, use_global_cache);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(name, e)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| PersistenceError::Serialization {
                module: name.clone(),
                reason: format!("corrupt cache entry {:?}: {}", path, e),
            })
    }

    fn write_entry(&self, path: &Path, entry: &CacheEntry) -> Result<(), PersistenceError> {
        let parent = path.parent().ok_or_else(|| {
            io_error(
                &entry.name,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("cache entry path {:?} has no parent directory", path),
                ),
            )
        })?;
        std::fs::create_dir_all(parent).map_err(|e| io_error(&entry.name, e))?;

        let content =
            serde_json::to_vec_pretty(entry).map_err(|e| PersistenceError::Serialization {
                module: entry.name.clone(),
                reason: e.to_string(),
            })?;

        // Readers must never observe a partially written entry.
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_error(&entry.name, e))?;
        tmp.write_all(&content)
            .map_err(|e| io_error(&entry.name, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| io_error(&entry.name, e))?;
        tmp.persist(path)
            .map_err(|e| io_error(&entry.name, e.error))?;
        Ok(())
    }
}

fn io_error(module: &QualifiedName, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        module: module.clone(),
        source,
    }
}

fn ir_digest(ir_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ir_bytes);
    format!("{:x}", hasher.finalize())
}

impl ModulePersistence for FileModuleCache {
    fn serialize_module(
        &self,
        module: &CompiledModule,
        use_global_cache: bool,
        no_overwrite: bool,
    ) -> Result<(), PersistenceError> {
        let path = self.entry_path(&module.name, use_global_cache);
        if no_overwrite && path.exists() {
            debug!(
                "Module {} already cached at {:?}, not overwriting",
                module.name, path
            );
            return Ok(());
        }

        let ir_bytes =
            serde_json::to_vec(&module.ir).map_err(|e| PersistenceError::Serialization {
                module: module.name.clone(),
                reason: e.to_string(),
            })?;

        let entry = CacheEntry {
            name: module.name.clone(),
            stage: module.stage,
            digest: ir_digest(&ir_bytes),
            written_at: Utc::now(),
            ir: module.ir.clone(),
        };

        self.write_entry(&path, &entry)?;
        debug!("Persisted module {} to {:?}", module.name, path);
        Ok(())
    }
}
