//! Thumbnail job payloads and queue bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Request to derive resized variants for one record.
///
/// Fields default to empty so a payload missing either one still decodes
/// and is rejected by the worker with a field-specific error.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailJob {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl ThumbnailJob {
    pub fn new(file_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.to_string(),
            user_id: user_id.into(),
        }
    }
}

/// Lifecycle of a queued job.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Dead-lettered: no further attempts.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status `{}`", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as held by the queue, with its raw payload.
#[derive(Clone, Debug)]
pub struct QueuedJob {
    pub id: Uuid,
    pub payload: String,
    pub status: JobStatus,
    /// Attempts made so far, including the current one once claimed.
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Counts per status, reported by `/stats`.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}
