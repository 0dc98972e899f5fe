//! Supervisor: worker lifecycle, crash recovery, hydration, and the
//! administrative surface (pause/resume/reset/status).

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{download, fleet_loop, generate, poll, WorkerContext};
use crate::bus::{BusStatus, TaskContext, TaskInput, TaskType};
use crate::store::{AccountStats, DbStats, JobStatus};

/// How long shutdown waits for an in-flight task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// What the administrative reset touched.
#[derive(Debug, Clone, Default)]
pub struct ResetReport {
    pub cleared_accounts: usize,
    pub cleared_active_jobs: usize,
    pub reset_jobs: u64,
}

/// Combined snapshot for the `queue_status` surface.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub bus: BusStatus,
    pub db: DbStats,
    pub accounts: AccountStats,
}

pub struct Supervisor {
    ctx: Arc<WorkerContext>,
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            ctx,
            stop,
            handles: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    /// Startup recovery: jobs a worker owned when the process died go back
    /// to `draft` so the user (or a bulk start) re-issues them. `download`
    /// jobs are kept; their recorded video URL is still usable.
    pub async fn recover(&self) -> Result<u64> {
        let n = self.ctx.store.recover_interrupted_jobs().await?;
        if n > 0 {
            tracing::warn!("reset {n} interrupted jobs to draft");
        }
        Ok(n)
    }

    /// Re-enqueue persisted work after a restart: `pending` jobs restart
    /// from generate, `download` jobs go straight to the download queue.
    /// Returns how many tasks were enqueued.
    pub async fn hydrate(&self) -> Result<usize> {
        let jobs = self.ctx.store.list_pending_jobs().await?;
        let mut enqueued = 0;
        for job in jobs {
            match job.progress.status {
                JobStatus::Pending => match self.ctx.bus.start_job(job.id) {
                    Ok(true) => enqueued += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(job_id = job.id, "hydration skipped: {err}");
                    }
                },
                JobStatus::Download => {
                    if !self.ctx.bus.track(job.id) {
                        continue;
                    }
                    let input = TaskInput {
                        video_url: job.result.video_url.clone(),
                        video_id: job.result.video_id.clone(),
                        generation_id: job.result.generation_id.clone(),
                        account_id: job.account_id,
                        ..TaskInput::default()
                    };
                    match self.ctx.bus.try_enqueue(TaskContext::download(job.id, input)) {
                        Ok(()) => enqueued += 1,
                        Err(err) => {
                            self.ctx.bus.release(job.id);
                            tracing::warn!(job_id = job.id, "hydration skipped: {err}");
                        }
                    }
                }
                _ => {}
            }
        }
        if enqueued > 0 {
            tracing::info!("hydrated {enqueued} persisted jobs onto the queues");
        }
        Ok(enqueued)
    }

    /// Spawn all three fleets. Idempotent only after `stop_all`.
    pub fn start_all(&mut self) {
        self.stop.send_replace(false);
        let cfg = &self.ctx.cfg;
        tracing::info!(
            generate = cfg.generate_workers,
            poll = cfg.poll_workers,
            download = cfg.download_workers,
            "starting worker fleets"
        );

        for _ in 0..cfg.generate_workers {
            self.handles.push(tokio::spawn(fleet_loop(
                Arc::clone(&self.ctx),
                TaskType::Generate,
                self.stop.subscribe(),
                generate::process,
            )));
        }
        for _ in 0..cfg.poll_workers {
            self.handles.push(tokio::spawn(fleet_loop(
                Arc::clone(&self.ctx),
                TaskType::Poll,
                self.stop.subscribe(),
                poll::process,
            )));
        }
        for _ in 0..cfg.download_workers {
            self.handles.push(tokio::spawn(fleet_loop(
                Arc::clone(&self.ctx),
                TaskType::Download,
                self.stop.subscribe(),
                download::process,
            )));
        }
    }

    /// Cooperative shutdown: signal every worker, wait out the grace
    /// period, abort stragglers, release all account leases.
    pub async fn stop_all(&mut self) {
        tracing::info!("stopping worker fleets");
        let _ = self.stop.send(true);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for mut handle in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        let released = self.ctx.pool.force_reset();
        if released > 0 {
            tracing::info!("released {released} account leases on shutdown");
        }
        tracing::info!("all workers stopped");
    }

    /// Stop and restart the fleets (applies config changes, clears wedges).
    pub async fn restart_workers(&mut self) {
        self.stop_all().await;
        self.start_all();
    }

    pub fn pause(&self) {
        self.ctx.bus.pause();
    }

    pub fn resume(&self) {
        self.ctx.bus.resume();
    }

    /// Emergency reset: clear every account lease, empty the active set,
    /// and push all in-flight jobs back to `pending` with a clean slate.
    pub async fn reset(&self) -> Result<ResetReport> {
        tracing::warn!("system reset triggered");

        let cleared_accounts = self.ctx.pool.force_reset();
        let cleared_active_jobs = self.ctx.bus.status().active_count;
        self.ctx.bus.clear_active();
        let reset_jobs = self.ctx.store.reset_active_jobs().await?;

        tracing::info!(
            cleared_accounts,
            cleared_active_jobs,
            reset_jobs,
            "system reset complete"
        );
        Ok(ResetReport {
            cleared_accounts,
            cleared_active_jobs,
            reset_jobs,
        })
    }

    /// Maintenance pass: active jobs silent past the cutoff go back to
    /// `pending`.
    pub async fn reset_stale(&self) -> Result<u64> {
        let n = self
            .ctx
            .store
            .reset_stale_jobs(self.ctx.cfg.stale_cutoff_minutes)
            .await?;
        if n > 0 {
            tracing::warn!("reset {n} stale jobs to pending");
        }
        Ok(n)
    }

    /// Queue, database, and account snapshot for the admin surface.
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        Ok(QueueStatus {
            bus: self.ctx.bus.status(),
            db: self.ctx.store.db_stats().await?,
            accounts: self.ctx.store.account_stats().await?,
        })
    }
}
