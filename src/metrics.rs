use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all maintenance metrics
const PREFIX: &str = "compiler_maintenance";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_executions_total"),
            "Total background job executions by job kind and outcome"
        ),
        &["job", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job execution duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["job"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOBS_QUEUED: Gauge = Gauge::new(
        format!("{PREFIX}_background_jobs_queued"),
        "Number of background jobs waiting for a worker"
    ).expect("Failed to create background_jobs_queued metric");

    pub static ref BACKGROUND_JOBS_RUNNING: Gauge = Gauge::new(
        format!("{PREFIX}_background_jobs_running"),
        "Number of background jobs currently executing"
    ).expect("Failed to create background_jobs_running metric");

    // Compilation Lock Metrics
    pub static ref WRITE_COMPILATION_LOCK_HOLD_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_write_compilation_lock_hold_seconds"),
            "Time the write compilation lock was held"
        )
        .buckets(vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create write_compilation_lock_hold_seconds metric");

    pub static ref WRITE_COMPILATION_LOCK_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_write_compilation_lock_wait_seconds"),
            "Time spent waiting to acquire the write compilation lock"
        )
        .buckets(vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create write_compilation_lock_wait_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOBS_QUEUED.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOBS_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(WRITE_COMPILATION_LOCK_HOLD_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(WRITE_COMPILATION_LOCK_WAIT_SECONDS.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished background job execution
pub fn record_background_job_execution(job: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job, status])
        .inc();

    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn set_background_jobs_queued(count: usize) {
    BACKGROUND_JOBS_QUEUED.set(count as f64);
}

pub fn set_background_jobs_running(count: usize) {
    BACKGROUND_JOBS_RUNNING.set(count as f64);
}

pub fn record_write_lock_hold(duration: Duration) {
    WRITE_COMPILATION_LOCK_HOLD_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_write_lock_wait(duration: Duration) {
    WRITE_COMPILATION_LOCK_WAIT_SECONDS.observe(duration.as_secs_f64());
}

/// Render all registered metrics in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}
