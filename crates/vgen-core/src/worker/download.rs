//! Download worker: best-effort watermark removal, streamed artifact
//! download, size verification, terminal bookkeeping.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::{fail_job, WorkerContext};
use crate::bus::TaskContext;
use crate::store::{Job, JobStatus, StageState};

pub(crate) async fn process(ctx: Arc<WorkerContext>, task: TaskContext) {
    let job_id = task.job_id;
    if let Err(err) = process_inner(&ctx, task).await {
        tracing::error!(job_id, "download task failed: {err:#}");
        fail_job(&ctx, job_id, &format!("Download error: {err:#}")).await;
    }
}

async fn process_inner(ctx: &WorkerContext, task: TaskContext) -> Result<()> {
    let Some(mut job) = ctx.store.get_job(task.job_id).await? else {
        tracing::error!(job_id = task.job_id, "job not found, dropping download task");
        ctx.bus.release(task.job_id);
        return Ok(());
    };

    let video_id = task
        .input
        .video_id
        .clone()
        .or_else(|| job.result.video_id.clone());
    let generation_id = task
        .input
        .generation_id
        .clone()
        .or_else(|| job.result.generation_id.clone());
    let Some(original_url) = task
        .input
        .video_url
        .clone()
        .or_else(|| job.result.video_url.clone())
    else {
        return refuse(ctx, job.id, "Missing download_url").await;
    };

    // Watermark removal is strictly best-effort: any failure falls back to
    // the original URL.
    let clean_url = try_clean_url(ctx, &job, video_id.as_deref(), generation_id.as_deref()).await;
    let source_url = clean_url.clone().unwrap_or_else(|| original_url.clone());

    tracing::info!(job_id = job.id, url = %source_url, "downloading video");

    let dir = ctx.cfg.downloads_dir();
    tokio::fs::create_dir_all(&dir).await?;
    let filename = format!(
        "{}_{}_{}.mp4",
        ctx.cfg.platform,
        job.id,
        video_id.as_deref().unwrap_or("unknown")
    );
    let path = dir.join(&filename);

    match fetch_to_file(ctx, &source_url, &path).await? {
        FetchOutcome::HttpError(status) => {
            return refuse(ctx, job.id, &format!("HTTP {status}")).await;
        }
        FetchOutcome::TooSmall(bytes) => {
            // Presumed truncated or an error page; don't keep it around.
            let _ = tokio::fs::remove_file(&path).await;
            return refuse(ctx, job.id, &format!("File too small: {bytes} bytes")).await;
        }
        FetchOutcome::Ok(bytes) => {
            tracing::info!(job_id = job.id, %filename, bytes, "download complete");
        }
    }

    job.progress.status = JobStatus::Done;
    job.progress.percent = 100;
    job.result.local_path = Some(path.to_string_lossy().into_owned());
    let state = job.task_state_mut();
    state.set_stage("download", StageState {
        status: "completed".to_string(),
        ..StageState::default()
    });
    state.current_task = Some("completed".to_string());
    if clean_url.is_some() {
        state.is_clean_video = Some(true);
    }
    ctx.store.update_job(&job).await?;
    ctx.bus.release(job.id);
    Ok(())
}

/// Ask the post-processing collaborator for a watermark-free URL. Returns
/// None on any failure; the caller keeps the original URL.
async fn try_clean_url(
    ctx: &WorkerContext,
    job: &Job,
    video_id: Option<&str>,
    generation_id: Option<&str>,
) -> Option<String> {
    let video_id = video_id?;
    let account_id = job.account_id?;

    let account = match ctx.store.get_account(account_id).await {
        Ok(Some(account)) if account.session.access_token.is_some() => account,
        Ok(_) => return None,
        Err(err) => {
            tracing::warn!(job_id = job.id, "watermark: account load failed: {err:#}");
            return None;
        }
    };

    let mut title: String = job.spec.prompt.chars().take(50).collect();
    if title.len() < job.spec.prompt.len() {
        title.push_str("...");
    }

    match ctx
        .watermark
        .clean_url(&account, video_id, generation_id, &title)
        .await
    {
        Ok(Some(url)) => {
            tracing::info!(job_id = job.id, "watermark removed, using clean URL");
            Some(url)
        }
        Ok(None) => {
            tracing::warn!(job_id = job.id, "watermark removal declined, using original URL");
            None
        }
        Err(err) => {
            tracing::warn!(job_id = job.id, "watermark removal failed: {err:#}");
            None
        }
    }
}

enum FetchOutcome {
    Ok(u64),
    HttpError(u16),
    TooSmall(u64),
}

/// Stream the response body to `path` through an 8 KiB write buffer,
/// returning how it went.
async fn fetch_to_file(ctx: &WorkerContext, url: &str, path: &Path) -> Result<FetchOutcome> {
    let mut response = ctx.http.get(url).send().await?;
    let status = response.status();
    if status.as_u16() != 200 {
        return Ok(FetchOutcome::HttpError(status.as_u16()));
    }

    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::with_capacity(8 * 1024, file);
    let mut total: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    writer.flush().await?;

    if total < ctx.cfg.min_download_bytes {
        return Ok(FetchOutcome::TooSmall(total));
    }
    Ok(FetchOutcome::Ok(total))
}

async fn refuse(ctx: &WorkerContext, job_id: i64, message: &str) -> Result<()> {
    tracing::error!(job_id, "download refused: {message}");
    ctx.store
        .update_status(job_id, JobStatus::Failed, Some(message))
        .await?;
    ctx.bus.release(job_id);
    Ok(())
}
