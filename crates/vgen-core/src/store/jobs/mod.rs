//! Job repository operations, split into reads and writes.

mod read;
mod write;

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) use super::placeholders;
use super::types::{Job, JobProgress, JobResult, JobSpec, JobStatus, TaskState};

/// Column list shared by every job SELECT.
pub(crate) const JOB_COLUMNS_SQL: &str = "id, prompt, image_path, duration, aspect_ratio, \
     status, progress, error_message, retry_count, max_retries, \
     video_url, video_id, generation_id, local_path, \
     account_id, task_state, created_at, updated_at";

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status_str: String = row.get("status");
    let task_state_json: Option<String> = row.get("task_state");

    let task_state = task_state_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str::<TaskState>)
        .transpose()?;

    Ok(Job {
        id: row.get("id"),
        spec: JobSpec {
            prompt: row.get("prompt"),
            image_path: row.get("image_path"),
            duration: row.get("duration"),
            aspect_ratio: row.get("aspect_ratio"),
        },
        progress: JobProgress {
            status: JobStatus::from_str(&status_str),
            percent: row.get("progress"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
        },
        result: JobResult {
            video_url: row.get("video_url"),
            video_id: row.get("video_id"),
            generation_id: row.get("generation_id"),
            local_path: row.get("local_path"),
        },
        account_id: row.get("account_id"),
        task_state,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
