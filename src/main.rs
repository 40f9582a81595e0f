use anyhow::{bail, Context, Result};
use clap::Parser;
use compiler_maintenance::background_jobs::{create_scheduler, JobContext};
use compiler_maintenance::cache::FileModuleCache;
use compiler_maintenance::compiler::ModuleManifest;
use compiler_maintenance::config::{AppConfig, CliConfig, FileConfig};
use compiler_maintenance::job_store::{JobRunStore, SqliteJobRunStore};
use compiler_maintenance::locking::CompilationLockManager;
use compiler_maintenance::{metrics, SerializeModuleJob};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Persist the compiled modules listed in a manifest to the module cache.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the TOML manifest listing modules to serialize.
    #[clap(value_parser = parse_path)]
    pub manifest: PathBuf,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Root directory of the module cache.
    #[clap(long, value_parser = parse_path)]
    pub cache_dir: Option<PathBuf>,

    /// Write to the global cache instead of the project-local one.
    #[clap(long)]
    pub global_cache: bool,

    /// Number of background workers.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Path to the SQLite database keeping job run history.
    #[clap(long, value_parser = parse_path)]
    pub history_db: Option<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            cache_dir: self.cache_dir.clone(),
            use_global_cache: self.global_cache,
            worker_threads: self.workers,
            history_db: self.history_db.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Loading module manifest from {:?}...", cli_args.manifest);
    let manifest = ModuleManifest::load(&cli_args.manifest)?;
    let registry = Arc::new(manifest.into_registry()?);
    let module_names = registry.module_names();
    info!("Loaded {} modules", module_names.len());

    let job_store: Arc<dyn JobRunStore> = match &config.history_db {
        Some(path) => {
            info!("Opening job history database at {:?}...", path);
            Arc::new(SqliteJobRunStore::new(path)?)
        }
        None => Arc::new(SqliteJobRunStore::in_memory()?),
    };

    let persistence = Arc::new(FileModuleCache::new(
        config.global_cache_dir.clone(),
        config.local_cache_dir.clone(),
    ));
    info!(
        "Writing modules to the {} cache at {:?}",
        if config.use_global_cache {
            "global"
        } else {
            "local"
        },
        persistence.root(config.use_global_cache)
    );

    let job_context = JobContext::new(
        Arc::new(CompilationLockManager::new()),
        registry,
        persistence,
        config.runtime_settings(),
    );

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, handle) = create_scheduler(
        job_store,
        shutdown_token.clone(),
        job_context,
        config.scheduler_options(),
    );
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    let mut job_handles = Vec::with_capacity(module_names.len());
    for name in module_names {
        job_handles.push(handle.submit(SerializeModuleJob::new(name))?);
    }

    // A no-op when autostart is enabled
    handle.start_background_jobs().await?;

    let outcomes = futures::future::join_all(job_handles.into_iter().map(|job_handle| async move {
        let name = job_handle.name().to_string();
        (name, job_handle.outcome().await)
    }))
    .await;

    let mut failures = 0;
    for (name, outcome) in &outcomes {
        if let Err(e) = outcome {
            error!("{} failed: {}", name, e);
            failures += 1;
        }
    }
    info!(
        "{} of {} serialization jobs succeeded",
        outcomes.len() - failures,
        outcomes.len()
    );

    shutdown_token.cancel();
    scheduler_task
        .await
        .context("Scheduler task terminated abnormally")?;

    debug!("Final metrics:\n{}", metrics::gather_text());

    if failures > 0 {
        bail!("{} serialization jobs failed", failures);
    }
    Ok(())
}
