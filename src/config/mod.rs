mod file_config;

pub use file_config::{BackgroundJobsConfig, FileConfig};

use crate::background_jobs::{RuntimeSettings, SchedulerOptions};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub cache_dir: Option<PathBuf>,
    pub use_global_cache: bool,
    pub worker_threads: Option<usize>,
    pub history_db: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub cache_dir: PathBuf,
    pub use_global_cache: bool,
    pub global_cache_dir: PathBuf,
    pub local_cache_dir: PathBuf,
    /// Run history database, kept in memory when unset.
    pub history_db: Option<PathBuf>,

    // Feature configs (with defaults)
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let cache_dir = file
            .cache_dir
            .map(PathBuf::from)
            .or_else(|| cli.cache_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("cache_dir must be specified via --cache-dir or in config file")
            })?;

        // A missing directory is created on first write, anything else is an error
        if cache_dir.exists() && !cache_dir.is_dir() {
            bail!("cache_dir is not a directory: {:?}", cache_dir);
        }

        let use_global_cache = file.use_global_cache.unwrap_or(cli.use_global_cache);

        let global_cache_dir = file
            .global_cache_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("global"));
        let local_cache_dir = file
            .local_cache_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("local"));

        let history_db = file
            .history_db
            .map(PathBuf::from)
            .or_else(|| cli.history_db.clone());

        let jobs_file = file.background_jobs.unwrap_or_default();
        let defaults = BackgroundJobsSettings::default();
        let background_jobs = BackgroundJobsSettings {
            worker_threads: jobs_file
                .worker_threads
                .or(cli.worker_threads)
                .unwrap_or(defaults.worker_threads),
            autostart_background_jobs: jobs_file
                .autostart_background_jobs
                .unwrap_or(defaults.autostart_background_jobs),
            shutdown_timeout_secs: jobs_file
                .shutdown_timeout_secs
                .unwrap_or(defaults.shutdown_timeout_secs),
        };

        if background_jobs.worker_threads == 0 {
            bail!("worker_threads must be at least 1");
        }

        Ok(Self {
            cache_dir,
            use_global_cache,
            global_cache_dir,
            local_cache_dir,
            history_db,
            background_jobs,
        })
    }

    /// Settings visible to jobs while they run.
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            use_global_cache: self.use_global_cache,
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            worker_threads: self.background_jobs.worker_threads,
            start_background_jobs: self.background_jobs.autostart_background_jobs,
            shutdown_timeout: Duration::from_secs(self.background_jobs.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJobsSettings {
    pub worker_threads: usize,
    pub autostart_background_jobs: bool,
    pub shutdown_timeout_secs: u64,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            autostart_background_jobs: true,
            shutdown_timeout_secs: 30,
        }
    }
}
