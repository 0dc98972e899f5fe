//! Generate worker: lease an account, submit the job, hand off to polling.
//!
//! Every remote failure lands in one policy bucket, each with its own retry
//! counter carried in the task envelope. The account lease is released on
//! every path out of the submit attempt.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::{fail_job, WorkerContext};
use crate::bus::{TaskContext, TaskInput};
use crate::remote::{ApiError, ApiErrorKind, Submitted};
use crate::store::db::unix_timestamp;
use crate::store::{Account, Job, JobStatus, StageState};

/// Delay before re-trying when no account is free.
const NO_ACCOUNT_DELAY: Duration = Duration::from_secs(10);
/// Delay before re-trying after a heavy-load rejection.
const HEAVY_LOAD_DELAY: Duration = Duration::from_secs(15);
/// Delay before re-trying on another account after a concurrency rejection.
const CONCURRENT_DELAY: Duration = Duration::from_secs(5);
/// Delay before re-trying an unclassified transient failure.
const TRANSIENT_DELAY: Duration = Duration::from_secs(10);

pub(crate) async fn process(ctx: Arc<WorkerContext>, task: TaskContext) {
    let job_id = task.job_id;
    if let Err(err) = process_inner(&ctx, task).await {
        tracing::error!(job_id, "generate task failed: {err:#}");
        fail_job(&ctx, job_id, &format!("Internal error: {err:#}")).await;
    }
}

async fn process_inner(ctx: &WorkerContext, mut task: TaskContext) -> Result<()> {
    let Some(mut job) = ctx.store.get_job(task.job_id).await? else {
        tracing::error!(job_id = task.job_id, "job not found, dropping task");
        ctx.bus.release(task.job_id);
        return Ok(());
    };
    if job.progress.status.is_terminal() {
        tracing::debug!(job_id = job.id, "job already terminal, dropping task");
        ctx.bus.release(job.id);
        return Ok(());
    }

    let Some(mut account) = ctx.pool.acquire(&task.input.exclude_account_ids).await? else {
        return no_account_requeue(ctx, task).await;
    };

    // Everything between acquire and release runs in this block so the
    // lease is dropped on every exit, including `?` propagation.
    let submit_result: Result<Result<Submitted, ApiError>> = async {
        ctx.pool.ensure_device_id(&mut account).await?;

        job.progress.status = JobStatus::Processing;
        job.account_id = Some(account.id);
        ctx.store.update_job(&job).await?;
        tracing::info!(job_id = job.id, account_id = account.id, "submitting generation");

        let api = ctx.api.client_for(&account);
        Ok(api.submit(&job.spec).await)
    }
    .await;
    ctx.pool.release(account.id);

    match submit_result? {
        Ok(submitted) => on_submitted(ctx, job, task, submitted).await,
        Err(err) => on_submit_error(ctx, job, task, &account, err).await,
    }
}

/// Success: record the remote task id, flip to generating, enqueue a poll.
async fn on_submitted(
    ctx: &WorkerContext,
    mut job: Job,
    task: TaskContext,
    submitted: Submitted,
) -> Result<()> {
    tracing::info!(job_id = job.id, task_id = %submitted.task_id, "generation submitted");

    job.progress.status = JobStatus::Generating;
    let account_id = job.account_id;
    let state = job.task_state_mut();
    state.set_stage("generate", StageState {
        status: "completed".to_string(),
        task_id: Some(submitted.task_id.clone()),
        completed_at: Some(unix_timestamp()),
        ..StageState::default()
    });
    state.set_stage("poll", StageState::pending());
    state.current_task = Some("poll".to_string());
    ctx.store.update_job(&job).await?;

    let input = TaskInput {
        task_id: Some(submitted.task_id),
        account_id,
        ..TaskInput::default()
    };
    ctx.bus
        .enqueue(TaskContext::poll(job.id, input))
        .await
        .map_err(|e| anyhow::anyhow!("poll enqueue: {e}"))?;

    // Successful hand-off: the generator no longer owns this job.
    ctx.bus.release(task.job_id);
    Ok(())
}

/// Apply the per-kind retry policy for a rejected submission.
async fn on_submit_error(
    ctx: &WorkerContext,
    job: Job,
    mut task: TaskContext,
    account: &Account,
    err: ApiError,
) -> Result<()> {
    let max_retries = ctx.cfg.max_retry_count;
    tracing::warn!(
        job_id = job.id,
        account_id = account.id,
        kind = ?err.kind,
        "submit rejected: {err}"
    );

    match err.kind {
        ApiErrorKind::HeavyLoad => {
            if task.input.heavy_load_retry_count >= max_retries {
                return give_up(ctx, job.id, &format!("Max retries exceeded: {err}")).await;
            }
            task.input.heavy_load_retry_count += 1;
            tracing::warn!(
                job_id = job.id,
                retry = task.input.heavy_load_retry_count,
                "service under heavy load, re-queuing in {}s",
                HEAVY_LOAD_DELAY.as_secs()
            );
            requeue_after(ctx, task, HEAVY_LOAD_DELAY).await
        }

        ApiErrorKind::TooManyConcurrentTasks => {
            if task.input.concurrent_retry_count >= max_retries {
                return give_up(ctx, job.id, &format!("Max retries exceeded: {err}")).await;
            }
            exclude_account(&mut task.input, account.id);
            task.input.concurrent_retry_count += 1;
            tracing::warn!(
                job_id = job.id,
                account_id = account.id,
                retry = task.input.concurrent_retry_count,
                "account at concurrent-task limit, switching accounts"
            );
            requeue_after(ctx, task, CONCURRENT_DELAY).await
        }

        ApiErrorKind::PhoneRequired | ApiErrorKind::NoCredits | ApiErrorKind::Unauthorized => {
            match err.kind {
                ApiErrorKind::PhoneRequired => ctx.pool.mark_phone_required(account.id).await?,
                ApiErrorKind::NoCredits => ctx.pool.mark_no_credits(account.id).await?,
                _ => ctx.pool.mark_expired(account.id).await?,
            }

            if task.input.account_switch_retry_count >= max_retries {
                return give_up(ctx, job.id, &format!("Max retries exceeded: {err}")).await;
            }
            exclude_account(&mut task.input, account.id);
            task.input.account_switch_retry_count += 1;
            tracing::warn!(
                job_id = job.id,
                account_id = account.id,
                retry = task.input.account_switch_retry_count,
                "account unusable ({:?}), switching accounts",
                err.kind
            );
            requeue(ctx, task).await
        }

        ApiErrorKind::Transient => {
            if task.input.api_retry_count >= ctx.cfg.generic_retry_limit {
                return give_up(
                    ctx,
                    job.id,
                    &format!(
                        "API failed after {} retries: {err}",
                        ctx.cfg.generic_retry_limit
                    ),
                )
                .await;
            }
            task.input.api_retry_count += 1;
            tracing::warn!(
                job_id = job.id,
                retry = task.input.api_retry_count,
                "transient API error, re-queuing: {err}"
            );
            requeue_after(ctx, task, TRANSIENT_DELAY).await
        }
    }
}

/// Pool exhausted: bounded re-queue, then a terminal failure.
async fn no_account_requeue(ctx: &WorkerContext, mut task: TaskContext) -> Result<()> {
    let limit = ctx.cfg.no_account_retry_limit;
    if task.input.no_account_retry_count >= limit {
        tracing::error!(job_id = task.job_id, "no account available after {limit} retries");
        return give_up(
            ctx,
            task.job_id,
            &format!("No available accounts after {limit} retries"),
        )
        .await;
    }
    task.input.no_account_retry_count += 1;
    tracing::warn!(
        job_id = task.job_id,
        retry = task.input.no_account_retry_count,
        "no account available, re-queuing in {}s",
        NO_ACCOUNT_DELAY.as_secs()
    );
    requeue_after(ctx, task, NO_ACCOUNT_DELAY).await
}

fn exclude_account(input: &mut TaskInput, account_id: i64) {
    if !input.exclude_account_ids.contains(&account_id) {
        input.exclude_account_ids.push(account_id);
    }
}

async fn requeue_after(ctx: &WorkerContext, task: TaskContext, delay: Duration) -> Result<()> {
    tokio::time::sleep(delay).await;
    requeue(ctx, task).await
}

async fn requeue(ctx: &WorkerContext, task: TaskContext) -> Result<()> {
    ctx.bus
        .enqueue(task)
        .await
        .map_err(|e| anyhow::anyhow!("generate re-enqueue: {e}"))
}

async fn give_up(ctx: &WorkerContext, job_id: i64, message: &str) -> Result<()> {
    ctx.store
        .update_status(job_id, JobStatus::Failed, Some(message))
        .await?;
    ctx.bus.release(job_id);
    Ok(())
}
