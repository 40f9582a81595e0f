use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub cache_dir: Option<String>,
    pub use_global_cache: Option<bool>,
    pub global_cache_dir: Option<String>,
    pub local_cache_dir: Option<String>,
    pub history_db: Option<String>,

    // Feature configs
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub worker_threads: Option<usize>,
    pub autostart_background_jobs: Option<bool>,
    pub shutdown_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
