use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Queued => "queued",
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobRunStatus::Queued),
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobRunStatus::Completed | JobRunStatus::Failed)
    }
}

/// One submitted job instance and what happened to it.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    /// Instance name, e.g. `SerializeModuleJob(Standard.Base.Data)`.
    pub job_name: String,
    /// Job type, e.g. `serialize_module`.
    pub job_kind: String,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
}
