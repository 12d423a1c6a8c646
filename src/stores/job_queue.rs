//! Durable thumbnail queue in SQLite.
//!
//! Jobs move `pending -> running -> completed`, go back to `pending` for a
//! retry, or end in `failed` once dead-lettered. A claim is a single
//! `UPDATE ... RETURNING`, so two consumers never receive the same job.

use super::{JobQueue, StoreError, StoreResult};
use crate::models::job::{JobStatus, QueueStats, QueuedJob, ThumbnailJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const JOB_COLUMNS: &str =
    "id, payload, status, attempts, max_attempts, last_error, created_at";

#[derive(FromRow, Debug)]
struct JobRow {
    id: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(QueuedJob {
            id: Uuid::parse_str(&row.id)
                .map_err(|_| StoreError::Corrupt(format!("job id `{}`", row.id)))?,
            payload: row.payload,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Arc<SqlitePool>,
    max_attempts: i64,
}

impl SqliteJobQueue {
    pub fn new(db: Arc<SqlitePool>, max_attempts: i64) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claim the oldest pending job, counting the attempt.
    pub async fn claim_next(&self) -> StoreResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE thumbnail_jobs
             SET status = 'running', attempts = attempts + 1, updated_at = ?
             WHERE seq = (SELECT seq FROM thumbnail_jobs WHERE status = 'pending'
                          ORDER BY seq ASC LIMIT 1)
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(Utc::now())
        .fetch_optional(&*self.db)
        .await?;

        let job = row.map(QueuedJob::try_from).transpose()?;
        if let Some(job) = &job {
            debug!("claimed job {} (attempt {}/{})", job.id, job.attempts, job.max_attempts);
        }
        Ok(job)
    }

    /// Acknowledge a finished job.
    pub async fn complete(&self, id: Uuid) -> StoreResult<()> {
        self.set_status(id, JobStatus::Completed, None).await
    }

    /// Return a job to the queue for another attempt.
    pub async fn retry(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.set_status(id, JobStatus::Pending, Some(error)).await
    }

    /// Dead-letter a job.
    pub async fn fail(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.set_status(id, JobStatus::Failed, Some(error)).await
    }

    /// Put jobs left `running` by a previous process back in the queue.
    pub async fn requeue_stalled(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE thumbnail_jobs SET status = 'pending', updated_at = ? WHERE status = 'running'",
        )
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub async fn get(&self, id: Uuid) -> StoreResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM thumbnail_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&*self.db)
        .await?;
        row.map(QueuedJob::try_from).transpose()
    }

    async fn set_status(&self, id: Uuid, status: JobStatus, error: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE thumbnail_jobs
             SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &ThumbnailJob) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO thumbnail_jobs (id, payload, status, attempts, max_attempts, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(serde_json::to_string(job)?)
        .bind(self.max_attempts)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;

        debug!("enqueued thumbnail job {} for file {}", id, job.file_id);
        Ok(id)
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM thumbnail_jobs GROUP BY status",
        )
        .fetch_all(&*self.db)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>().map_err(StoreError::Corrupt)? {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Running => stats.running = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}
