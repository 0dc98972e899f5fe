//! Job-level operations the CLI (or any front-end) drives: create, list,
//! start, cancel, retry, bulk variants, upload staging, account management.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::bus::{TaskBus, TaskContext, TaskInput, TaskType};
use crate::config::VgenConfig;
use crate::pool::AccountPool;
use crate::remote::VideoApiFactory;
use crate::store::{
    Account, Job, JobCategory, JobId, JobSpec, JobStatus, JobStore, StageState,
};

/// Per-id outcome of a bulk operation.
#[derive(Debug)]
pub struct BulkOutcome {
    pub id: JobId,
    pub result: Result<()>,
}

/// One row of a credits scan.
#[derive(Debug)]
pub struct CreditScan {
    pub account_id: i64,
    pub email: String,
    pub credits: Result<i64>,
}

pub struct Service {
    cfg: VgenConfig,
    store: JobStore,
    bus: Arc<TaskBus>,
    pool: Arc<AccountPool>,
    api: Arc<dyn VideoApiFactory>,
}

impl Service {
    pub fn new(
        cfg: VgenConfig,
        store: JobStore,
        bus: Arc<TaskBus>,
        pool: Arc<AccountPool>,
        api: Arc<dyn VideoApiFactory>,
    ) -> Self {
        Self {
            cfg,
            store,
            bus,
            pool,
            api,
        }
    }

    /// Create a new draft job from validated inputs.
    pub async fn create_job(
        &self,
        prompt: &str,
        duration: i64,
        aspect_ratio: &str,
        image_path: Option<String>,
    ) -> Result<Job> {
        let spec = JobSpec::new(prompt, duration, aspect_ratio, image_path)?;
        let id = self.store.create_job(&spec).await?;
        tracing::info!(job_id = id, "job created");
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {id} vanished after insert"))
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(
        &self,
        skip: i64,
        limit: i64,
        category: Option<JobCategory>,
    ) -> Result<Vec<Job>> {
        self.store.list_jobs(skip, limit, category).await
    }

    /// Update spec fields of a job that has not started yet.
    pub async fn update_job(
        &self,
        id: JobId,
        prompt: Option<String>,
        duration: Option<i64>,
        aspect_ratio: Option<String>,
        image_path: Option<String>,
    ) -> Result<Job> {
        let Some(mut job) = self.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        if !job.can_start() {
            bail!(
                "cannot edit job {id} in status {}",
                job.progress.status.as_str()
            );
        }

        job.spec = JobSpec::new(
            prompt.unwrap_or(job.spec.prompt),
            duration.unwrap_or(job.spec.duration),
            aspect_ratio.unwrap_or(job.spec.aspect_ratio),
            image_path.or(job.spec.image_path),
        )?;
        self.store.update_job(&job).await?;
        Ok(job)
    }

    /// Begin execution: validate status, require an eligible account, then
    /// register with the bus. A saturated generate queue surfaces as an
    /// error rather than silently dropping the job.
    pub async fn start_job(&self, id: JobId) -> Result<Job> {
        let Some(mut job) = self.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        if !job.can_start() {
            bail!(
                "cannot start job {id} in status {}",
                job.progress.status.as_str()
            );
        }

        let eligible = self
            .store
            .list_eligible_accounts(&self.cfg.platform, &[])
            .await?;
        if eligible.is_empty() {
            bail!("no available accounts with credits");
        }

        // Persist pending before enqueueing so a fast worker never races a
        // stale full-row write. On back-pressure the job stays pending and a
        // later start (or hydration) picks it up.
        self.store
            .update_status(id, JobStatus::Pending, None)
            .await?;
        job.progress.status = JobStatus::Pending;
        self.bus.start_job(id)?;
        tracing::info!(job_id = id, "job started");
        Ok(job)
    }

    /// Cancel a running job.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job> {
        let Some(mut job) = self.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        if !job.can_cancel() {
            bail!(
                "cannot cancel job {id} in status {}",
                job.progress.status.as_str()
            );
        }

        job.progress.status = JobStatus::Cancelled;
        job.progress.error_message = Some("Cancelled by user".to_string());
        self.store.update_job(&job).await?;
        self.bus.release(id);
        tracing::info!(job_id = id, "job cancelled");
        Ok(job)
    }

    /// Reset a failed or cancelled job so it can run again: `pending`,
    /// zero progress, cleared error, zero retry count.
    pub async fn retry_job(&self, id: JobId) -> Result<Job> {
        let Some(mut job) = self.store.get_job(id).await? else {
            bail!("job {id} not found");
        };
        if !job.can_retry() {
            bail!(
                "cannot retry job {id} in status {}",
                job.progress.status.as_str()
            );
        }

        job.progress.status = JobStatus::Pending;
        job.progress.percent = 0;
        job.progress.error_message = None;
        job.progress.retry_count = 0;
        self.store.update_job(&job).await?;
        tracing::info!(job_id = id, "job reset for retry");
        Ok(job)
    }

    pub async fn delete_job(&self, id: JobId) -> Result<bool> {
        let deleted = self.store.delete_job(id).await?;
        if deleted {
            self.bus.release(id);
        }
        Ok(deleted)
    }

    /// Re-run a single stage of an existing job (administrative). The
    /// stage's task_state entry is reset and its input rebuilt from
    /// persisted fields.
    pub async fn retry_stage(&self, id: JobId, stage: TaskType) -> Result<Job> {
        let Some(mut job) = self.store.get_job(id).await? else {
            bail!("job {id} not found");
        };

        let input = match stage {
            TaskType::Generate => TaskInput::default(),
            TaskType::Poll => {
                let task_id = job
                    .task_state
                    .as_ref()
                    .and_then(|s| s.tasks.get("generate"))
                    .and_then(|g| g.task_id.clone());
                if task_id.is_none() {
                    bail!("job {id} has no recorded generation task id to poll");
                }
                TaskInput {
                    task_id,
                    account_id: job.account_id,
                    ..TaskInput::default()
                }
            }
            TaskType::Download => {
                if job.result.video_url.is_none() {
                    bail!("job {id} has no video URL to download");
                }
                TaskInput {
                    video_url: job.result.video_url.clone(),
                    video_id: job.result.video_id.clone(),
                    generation_id: job.result.generation_id.clone(),
                    account_id: job.account_id,
                    ..TaskInput::default()
                }
            }
        };

        let name = stage.as_str();
        let state = job.task_state_mut();
        state.set_stage(name, StageState::pending());
        if let Some(entry) = state.tasks.get_mut(name) {
            entry.error = None;
        }
        state.current_task = Some(name.to_string());
        job.progress.status = match stage {
            TaskType::Generate => JobStatus::Pending,
            TaskType::Poll => JobStatus::Generating,
            TaskType::Download => JobStatus::Download,
        };
        job.progress.error_message = None;
        self.store.update_job(&job).await?;

        self.bus.track(id);
        let task = TaskContext {
            job_id: id,
            task_type: stage,
            input,
        };
        if let Err(err) = self.bus.try_enqueue(task) {
            self.bus.release(id);
            return Err(err.into());
        }
        tracing::info!(job_id = id, stage = name, "stage re-enqueued");
        Ok(job)
    }

    pub async fn bulk_start(&self, ids: &[JobId]) -> Vec<BulkOutcome> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(BulkOutcome {
                id,
                result: self.start_job(id).await.map(|_| ()),
            });
        }
        out
    }

    pub async fn bulk_cancel(&self, ids: &[JobId]) -> Vec<BulkOutcome> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(BulkOutcome {
                id,
                result: self.cancel_job(id).await.map(|_| ()),
            });
        }
        out
    }

    pub async fn bulk_retry(&self, ids: &[JobId]) -> Vec<BulkOutcome> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(BulkOutcome {
                id,
                result: self.retry_job(id).await.map(|_| ()),
            });
        }
        out
    }

    pub async fn bulk_delete(&self, ids: &[JobId]) -> Vec<BulkOutcome> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = match self.delete_job(id).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(anyhow::anyhow!("job {id} not found")),
                Err(err) => Err(err),
            };
            out.push(BulkOutcome { id, result });
        }
        out
    }

    /// Copy a user-supplied reference image into the uploads dir under a
    /// unique name, returning the stored path for use as `image_path`.
    pub async fn stage_upload(&self, source: &Path) -> Result<String> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let dir = self.cfg.uploads_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(format!("{}.{ext}", Uuid::new_v4()));
        tokio::fs::copy(source, &dest).await?;
        Ok(dest.to_string_lossy().into_owned())
    }

    pub async fn import_account(
        &self,
        email: &str,
        password_enc: Option<&str>,
        access_token: Option<&str>,
        credits: i64,
    ) -> Result<i64> {
        let id = self
            .store
            .add_account(&self.cfg.platform, email, password_enc, access_token, credits)
            .await?;
        tracing::info!(account_id = id, %email, "account imported");
        Ok(id)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts().await
    }

    /// Refresh the recorded balance of every live account via the remote
    /// API. Failures are reported per account, never aborting the scan.
    pub async fn scan_credits(&self) -> Result<Vec<CreditScan>> {
        let accounts = self.store.list_accounts().await?;
        let mut out = Vec::new();
        for account in accounts {
            if account.status != crate::store::AccountStatus::Live {
                continue;
            }
            let api = self.api.client_for(&account);
            let credits = self.pool.refresh_credits(&account, api.as_ref()).await;
            out.push(CreditScan {
                account_id: account.id,
                email: account.email.clone(),
                credits,
            });
        }
        Ok(out)
    }
}
