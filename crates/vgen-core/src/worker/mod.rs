//! Worker fleets: Generator, Poller, Downloader, and the Supervisor.
//!
//! Each fleet is `N` identical loop tasks consuming one bus queue. A loop
//! task blocks on the queue with a bounded wait, honors the pause flag, and
//! exits when the stop channel flips. Per-task failures never kill a loop:
//! the handler catches its own errors, marks the job failed, and cleans up.

pub mod download;
pub mod generate;
pub mod poll;
pub mod supervisor;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::bus::{TaskBus, TaskContext, TaskType};
use crate::config::VgenConfig;
use crate::pool::AccountPool;
use crate::remote::VideoApiFactory;
use crate::store::JobStore;
use crate::watermark::WatermarkRemover;

pub use supervisor::Supervisor;

/// Bounded wait on a queue read, so stop/pause are noticed promptly.
const QUEUE_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Re-check interval while the bus is paused.
const PAUSE_BACKOFF: Duration = Duration::from_millis(500);

/// Everything a worker needs, constructed once by the Supervisor's owner and
/// injected by value. No globals.
pub struct WorkerContext {
    pub cfg: VgenConfig,
    pub store: JobStore,
    pub bus: Arc<TaskBus>,
    pub pool: Arc<AccountPool>,
    pub api: Arc<dyn VideoApiFactory>,
    pub watermark: Arc<dyn WatermarkRemover>,
    /// Plain client for artifact downloads (no account headers).
    pub http: reqwest::Client,
}

/// One worker loop: dequeue from `ty`, run `handler`, repeat until stopped.
pub(crate) async fn fleet_loop<H, Fut>(
    ctx: Arc<WorkerContext>,
    ty: TaskType,
    mut stop: watch::Receiver<bool>,
    handler: H,
) where
    H: Fn(Arc<WorkerContext>, TaskContext) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if *stop.borrow() {
            break;
        }
        if ctx.bus.is_paused() {
            tokio::select! {
                _ = tokio::time::sleep(PAUSE_BACKOFF) => {}
                _ = stop.changed() => {}
            }
            continue;
        }

        let task = tokio::select! {
            task = ctx.bus.recv(ty, QUEUE_READ_TIMEOUT) => task,
            _ = stop.changed() => break,
        };

        if let Some(task) = task {
            handler(Arc::clone(&ctx), task).await;
        }
    }
    tracing::debug!("{} worker stopped", ty.as_str());
}

/// Best-effort terminal failure: persist status + message, drop the job from
/// the active set. Used by every worker's catch-all path.
pub(crate) async fn fail_job(ctx: &WorkerContext, job_id: i64, message: &str) {
    if let Err(err) = ctx
        .store
        .update_status(job_id, crate::store::JobStatus::Failed, Some(message))
        .await
    {
        tracing::error!(job_id, "failed to persist failure status: {err:#}");
    }
    ctx.bus.release(job_id);
}
