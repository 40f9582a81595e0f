use super::models::{JobRun, JobRunStatus};
use super::JobRunStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA: &str = "
CREATE TABLE job_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL,
    job_kind TEXT NOT NULL,
    priority INTEGER NOT NULL,
    submitted_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    status TEXT NOT NULL,
    error_message TEXT
);
CREATE INDEX idx_job_runs_job_name ON job_runs(job_name, id DESC);
CREATE INDEX idx_job_runs_status ON job_runs(status);
";

const SELECT_COLUMNS: &str = "SELECT id, job_name, job_kind, priority, submitted_at, started_at,
        finished_at, status, error_message FROM job_runs";

pub struct SqliteJobRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobRunStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let conn = Connection::open(path).context("Failed to open job history database")?;

        if is_new_db {
            info!("Creating new job history database at {:?}", path);
            Self::create_schema(&conn)?;
        } else {
            let db_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            if db_version != SCHEMA_VERSION {
                bail!(
                    "Job history database version {} is not supported (expected {})",
                    db_version,
                    SCHEMA_VERSION
                );
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(CREATE_SCHEMA)
            .context("Failed to create job history schema")?;
        conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        Ok(())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let status = JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed);

        let submitted_at_str: String = row.get("submitted_at")?;
        let started_at_str: Option<String> = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_name: row.get("job_name")?,
            job_kind: row.get("job_kind")?,
            priority: row.get("priority")?,
            submitted_at: Self::parse_datetime(&submitted_at_str).unwrap_or_else(Utc::now),
            started_at: started_at_str.as_deref().and_then(Self::parse_datetime),
            finished_at: finished_at_str.as_deref().and_then(Self::parse_datetime),
            status,
            error_message: row.get("error_message")?,
        })
    }
}

impl JobRunStore for SqliteJobRunStore {
    fn record_job_queued(&self, job_name: &str, job_kind: &str, priority: i32) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO job_runs (job_name, job_kind, priority, submitted_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_name,
                job_kind,
                priority,
                now,
                JobRunStatus::Queued.as_str()
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_job_start(&self, run_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE job_runs SET started_at = ?1, status = ?2 WHERE id = ?3",
            params![now, JobRunStatus::Running.as_str(), run_id],
        )?;

        Ok(())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![now, status.as_str(), error_message, run_id],
        )?;

        Ok(())
    }

    fn get_run(&self, run_id: i64) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;

        let run = stmt
            .query_row(params![run_id], Self::row_to_job_run)
            .optional()?;

        Ok(run)
    }

    fn get_job_history(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE job_name = ?1 ORDER BY id DESC LIMIT ?2",
            SELECT_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![job_name, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    fn get_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_COLUMNS))?;

        let runs = stmt
            .query_map(params![limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        // Called at startup, nothing can be queued or running yet
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status IN (?4, ?5)",
            params![
                JobRunStatus::Failed.as_str(),
                now,
                "Job was interrupted (process restart)",
                JobRunStatus::Queued.as_str(),
                JobRunStatus::Running.as_str()
            ],
        )?;

        Ok(count)
    }
}
