//! Job read operations: get, list views, counts.

use anyhow::Result;
use sqlx::Row;

use super::super::db::{unix_timestamp, JobStore};
use super::super::types::{DbStats, Job, JobCategory, JobId, JobStatus};
use super::{job_from_row, JOB_COLUMNS_SQL};

impl JobStore {
    /// Fetch a single job, or None.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS_SQL} FROM jobs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// List jobs newest first, optionally restricted to a category.
    pub async fn list_jobs(
        &self,
        skip: i64,
        limit: i64,
        category: Option<JobCategory>,
    ) -> Result<Vec<Job>> {
        let mut sql = format!("SELECT {JOB_COLUMNS_SQL} FROM jobs");
        if let Some(cat) = category {
            let quoted: Vec<String> = cat
                .statuses()
                .iter()
                .map(|s| format!("'{s}'"))
                .collect();
            sql.push_str(&format!(" WHERE status IN ({})", quoted.join(", ")));
        }
        sql.push_str(" ORDER BY id DESC LIMIT ?1 OFFSET ?2");

        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Jobs needing queue hydration on startup: `pending` (restart from
    /// generate) plus `download` (video_url already usable), oldest first.
    pub async fn list_pending_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS_SQL} FROM jobs \
             WHERE status IN ('pending', 'download') \
             ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Jobs in any worker-owned status, most recently touched first.
    pub async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS_SQL} FROM jobs \
             WHERE status IN ('pending', 'processing', 'sent_prompt', 'generating', 'download') \
             ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Active-status jobs not touched for longer than the cutoff.
    pub async fn list_stale_jobs(&self, cutoff_minutes: i64) -> Result<Vec<Job>> {
        let cutoff = unix_timestamp() - cutoff_minutes * 60;
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS_SQL} FROM jobs \
             WHERE status IN ('processing', 'sent_prompt', 'generating', 'download') \
               AND updated_at < ?1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Successfully finished jobs, newest first.
    pub async fn list_completed_jobs(&self, skip: i64, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS_SQL} FROM jobs \
             WHERE status IN ('done', 'completed') \
             ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Look a job up by the remote video id it produced.
    pub async fn find_by_video_id(&self, video_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS_SQL} FROM jobs WHERE video_id = ?1"
        ))
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_active_jobs(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs \
             WHERE status IN ('pending', 'processing', 'sent_prompt', 'generating', 'download')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Aggregate counts for the queue-status snapshot.
    pub async fn db_stats(&self) -> Result<DbStats> {
        let row = sqlx::query(
            "SELECT \
               COALESCE(SUM(CASE WHEN status IN ('done', 'completed') THEN 1 ELSE 0 END), 0) AS completed, \
               COALESCE(SUM(CASE WHEN status IN ('pending', 'draft') THEN 1 ELSE 0 END), 0) AS pending, \
               COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed, \
               COALESCE(SUM(CASE WHEN status IN ('processing', 'sent_prompt', 'generating', 'download') THEN 1 ELSE 0 END), 0) AS processing \
             FROM jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DbStats {
            completed: row.get("completed"),
            pending: row.get("pending"),
            failed: row.get("failed"),
            processing: row.get("processing"),
        })
    }
}
