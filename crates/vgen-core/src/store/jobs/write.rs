//! Job write operations: create, update, status changes, recovery, deletes.

use anyhow::{bail, Result};

use super::super::db::{unix_timestamp, JobStore};
use super::super::types::{Job, JobId, JobSpec, JobStatus};
use super::placeholders;

impl JobStore {
    /// Insert a new draft job from a validated spec. Returns the new id.
    pub async fn create_job(&self, spec: &JobSpec) -> Result<JobId> {
        let now = unix_timestamp();
        let row_id = sqlx::query(
            r#"
            INSERT INTO jobs (
                prompt, image_path, duration, aspect_ratio,
                status, progress, retry_count, max_retries,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 3, ?6, ?7)
            "#,
        )
        .bind(&spec.prompt)
        .bind(&spec.image_path)
        .bind(spec.duration)
        .bind(&spec.aspect_ratio)
        .bind(JobStatus::Draft.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    /// Persist every mutable field of a job (spec, progress, result,
    /// account, task_state). `updated_at` is stamped here.
    pub async fn update_job(&self, job: &Job) -> Result<()> {
        let now = unix_timestamp();
        let task_state_json = job
            .task_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET prompt = ?1,
                image_path = ?2,
                duration = ?3,
                aspect_ratio = ?4,
                status = ?5,
                progress = ?6,
                error_message = ?7,
                retry_count = ?8,
                max_retries = ?9,
                video_url = ?10,
                video_id = ?11,
                generation_id = ?12,
                local_path = ?13,
                account_id = ?14,
                task_state = ?15,
                updated_at = ?16
            WHERE id = ?17
            "#,
        )
        .bind(&job.spec.prompt)
        .bind(&job.spec.image_path)
        .bind(job.spec.duration)
        .bind(&job.spec.aspect_ratio)
        .bind(job.progress.status.as_str())
        .bind(job.progress.percent)
        .bind(&job.progress.error_message)
        .bind(job.progress.retry_count)
        .bind(job.progress.max_retries)
        .bind(&job.result.video_url)
        .bind(&job.result.video_id)
        .bind(&job.result.generation_id)
        .bind(&job.result.local_path)
        .bind(job.account_id)
        .bind(task_state_json)
        .bind(now)
        .bind(job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("job {} not found", job.id);
        }
        Ok(())
    }

    /// Update only status and error message.
    pub async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                error_message = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("job {id} not found");
        }
        Ok(())
    }

    /// Update only the progress percentage.
    pub async fn update_progress(&self, id: JobId, percent: i64) -> Result<()> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(percent)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("job {id} not found");
        }
        Ok(())
    }

    /// Remove a job row. Returns false if it did not exist.
    pub async fn delete_job(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove several jobs; returns how many rows went away.
    pub async fn bulk_delete(&self, ids: &[JobId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM jobs WHERE id IN ({})", placeholders(ids.len()));
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Set the same status on several jobs; returns how many were updated.
    pub async fn bulk_update_status(&self, ids: &[JobId], status: JobStatus) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = unix_timestamp();
        let sql = format!(
            "UPDATE jobs SET status = ?, updated_at = ? WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(status.as_str()).bind(now);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Startup recovery: any job a worker owned when the process died goes
    /// back to `draft`. `download` jobs keep their status because the
    /// recorded video_url is still usable. Returns the number reset.
    pub async fn recover_interrupted_jobs(&self) -> Result<u64> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'draft',
                updated_at = ?1
            WHERE status IN ('pending', 'processing', 'sent_prompt', 'generating')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Administrative reset: every in-flight job back to `pending` with a
    /// clean slate. Returns the number reset.
    pub async fn reset_active_jobs(&self) -> Result<u64> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                progress = 0,
                error_message = NULL,
                updated_at = ?1
            WHERE status IN ('processing', 'sent_prompt', 'generating', 'download')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Maintenance: reset active-status jobs whose `updated_at` is older
    /// than the cutoff back to `pending`. Returns the number reset.
    pub async fn reset_stale_jobs(&self, cutoff_minutes: i64) -> Result<u64> {
        let now = unix_timestamp();
        let cutoff = now - cutoff_minutes * 60;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                progress = 0,
                error_message = NULL,
                updated_at = ?1
            WHERE status IN ('processing', 'sent_prompt', 'generating', 'download')
              AND updated_at < ?2
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
