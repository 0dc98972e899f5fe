//! Poll worker: mirror remote progress, wait for completion, hand off to
//! download. Re-polls sleep a jittered interval so a large fleet doesn't
//! align with the service's rate-limit buckets.

use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use super::{fail_job, WorkerContext};
use crate::bus::{TaskContext, TaskInput};
use crate::remote::{Completion, CompletionStatus, VideoApi};
use crate::store::{Job, JobStatus, StageState};

pub(crate) async fn process(ctx: Arc<WorkerContext>, task: TaskContext) {
    let job_id = task.job_id;
    if let Err(err) = process_inner(&ctx, task).await {
        tracing::error!(job_id, "poll task failed: {err:#}");
        fail_job(&ctx, job_id, &format!("Poll error: {err:#}")).await;
    }
}

async fn process_inner(ctx: &WorkerContext, mut task: TaskContext) -> Result<()> {
    let Some(mut job) = ctx.store.get_job(task.job_id).await? else {
        tracing::error!(job_id = task.job_id, "job not found, dropping poll task");
        ctx.bus.release(task.job_id);
        return Ok(());
    };
    if job.progress.status.is_terminal() {
        ctx.bus.release(job.id);
        return Ok(());
    }

    let Some(task_id) = task.input.task_id.clone() else {
        return refuse(ctx, job.id, "Missing task_id for polling").await;
    };
    let Some(account_id) = task.input.account_id else {
        return refuse(ctx, job.id, "Missing account_id for polling").await;
    };

    if task.input.poll_count >= ctx.cfg.max_poll_count {
        tracing::error!(job_id = job.id, "exceeded max poll count");
        return refuse(
            ctx,
            job.id,
            &format!(
                "Video generation timeout after {} polls",
                ctx.cfg.max_poll_count
            ),
        )
        .await;
    }

    let Some(mut account) = ctx.store.get_account(account_id).await? else {
        return refuse(ctx, job.id, &format!("Account #{account_id} not found")).await;
    };
    ctx.pool.ensure_device_id(&mut account).await?;
    let api = ctx.api.client_for(&account);

    tracing::info!(
        job_id = job.id,
        %task_id,
        poll = task.input.poll_count + 1,
        "checking generation status"
    );

    mirror_progress(ctx, &mut job, api.as_ref(), &task_id).await;

    let completion = api
        .wait_for_completion(
            &task_id,
            Duration::from_secs(ctx.cfg.poll_call_timeout_secs),
        )
        .await
        .map_err(|e| anyhow::anyhow!("completion wait: {e}"))?;

    match completion {
        Some(done) => on_completion(ctx, job, task, done).await,
        None => {
            // Still pending: jittered sleep, back on the queue.
            task.input.poll_count += 1;
            let sleep_secs = rand::thread_rng()
                .gen_range(ctx.cfg.poll_sleep_min_secs..=ctx.cfg.poll_sleep_max_secs);
            tracing::info!(
                job_id = job.id,
                poll = task.input.poll_count,
                "still generating, re-polling in {sleep_secs}s"
            );
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
            ctx.bus
                .enqueue(task)
                .await
                .map_err(|e| anyhow::anyhow!("poll re-enqueue: {e}"))?;
            Ok(())
        }
    }
}

/// Write the percent reported by the pending list, if it moved. When the
/// task has already left the pending queue but nothing was recorded yet, a
/// 10% floor keeps progress displays from sitting at zero.
async fn mirror_progress(ctx: &WorkerContext, job: &mut Job, api: &dyn VideoApi, task_id: &str) {
    let pending = match api.list_pending().await {
        Ok(pending) => pending,
        Err(err) => {
            tracing::warn!(job_id = job.id, "progress check failed: {err}");
            return;
        }
    };

    let entry = pending.iter().find(|p| {
        p.id == task_id
            || (task_id.is_empty()
                && p.prompt
                    .as_deref()
                    .is_some_and(|prompt| prompt.contains(&job.spec.prompt)))
    });

    let new_percent = match entry {
        Some(entry) => (entry.progress_fraction * 100.0).round() as i64,
        None if job.progress.percent <= 0 => 10,
        None => return,
    };

    if new_percent != job.progress.percent {
        job.progress.percent = new_percent;
        if let Err(err) = ctx.store.update_progress(job.id, new_percent).await {
            tracing::warn!(job_id = job.id, "progress update failed: {err:#}");
        } else {
            tracing::info!(job_id = job.id, "progress {new_percent}%");
        }
    }
}

async fn on_completion(
    ctx: &WorkerContext,
    mut job: Job,
    task: TaskContext,
    done: Completion,
) -> Result<()> {
    if done.status == CompletionStatus::Failed || done.download_url.is_none() {
        // The remote generation failed; this must never reach the download
        // queue.
        let detail = done
            .error
            .as_deref()
            .unwrap_or(if done.download_url.is_none() {
                "missing download URL"
            } else {
                "failed"
            });
        let message = format!("Video generation failed: {detail}");
        tracing::error!(job_id = job.id, "{message}");

        job.progress.status = JobStatus::Failed;
        job.progress.error_message = Some(message.clone());
        let state = job.task_state_mut();
        state.set_stage("poll", StageState {
            status: "failed".to_string(),
            error: Some(message),
            ..StageState::default()
        });
        state.current_task = None;
        ctx.store.update_job(&job).await?;
        ctx.bus.release(job.id);
        return Ok(());
    }

    tracing::info!(job_id = job.id, "video ready");

    job.progress.status = JobStatus::Download;
    job.progress.percent = 100;
    job.result.video_url = done.download_url.clone();
    job.result.video_id = done.video_id.clone();
    job.result.generation_id = done.generation_id.clone();

    let state = job.task_state_mut();
    state.set_stage("poll", StageState {
        status: "completed".to_string(),
        ..StageState::default()
    });
    state.set_stage("download", StageState::pending());
    state.current_task = Some("download".to_string());
    ctx.store.update_job(&job).await?;

    let input = TaskInput {
        video_url: done.download_url,
        video_id: done.video_id,
        generation_id: done.generation_id,
        account_id: task.input.account_id,
        ..TaskInput::default()
    };
    ctx.bus
        .enqueue(TaskContext::download(job.id, input))
        .await
        .map_err(|e| anyhow::anyhow!("download enqueue: {e}"))?;
    Ok(())
}

/// Terminal refusal: a precondition for polling is unmet.
async fn refuse(ctx: &WorkerContext, job_id: i64, message: &str) -> Result<()> {
    ctx.store
        .update_status(job_id, JobStatus::Failed, Some(message))
        .await?;
    ctx.bus.release(job_id);
    Ok(())
}
