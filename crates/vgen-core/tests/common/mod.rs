//! Shared harness for the pipeline integration tests.

pub mod scripted_api;
pub mod video_server;

use std::sync::Arc;

use vgen_core::bus::TaskBus;
use vgen_core::config::VgenConfig;
use vgen_core::pool::AccountPool;
use vgen_core::service::Service;
use vgen_core::store::{JobId, JobStatus, JobStore};
use vgen_core::worker::{Supervisor, WorkerContext};

use self::scripted_api::{NoopWatermark, ScriptedApi, ScriptedFactory};

/// Fully wired pipeline over a temp-dir database and a scripted remote API.
pub struct TestHarness {
    pub cfg: VgenConfig,
    pub store: JobStore,
    pub bus: Arc<TaskBus>,
    pub pool: Arc<AccountPool>,
    pub api: Arc<ScriptedApi>,
    pub factory: Arc<ScriptedFactory>,
    pub supervisor: Supervisor,
    pub service: Service,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = VgenConfig::default();
        cfg.data_dir = dir.path().join("data");
        // Small fleets keep the paused-clock tests snappy.
        cfg.generate_workers = 2;
        cfg.poll_workers = 2;
        cfg.download_workers = 1;

        let store = JobStore::open_at(&cfg.db_path()).await.expect("open store");
        let bus = Arc::new(TaskBus::new(&cfg));
        let pool = Arc::new(AccountPool::new(store.clone(), cfg.platform.clone()));
        let api = Arc::new(ScriptedApi::default());
        let factory = Arc::new(ScriptedFactory::new(Arc::clone(&api)));

        let ctx = Arc::new(WorkerContext {
            cfg: cfg.clone(),
            store: store.clone(),
            bus: Arc::clone(&bus),
            pool: Arc::clone(&pool),
            api: factory.clone(),
            watermark: Arc::new(NoopWatermark),
            http: reqwest::Client::new(),
        });
        let supervisor = Supervisor::new(Arc::clone(&ctx));
        let service = Service::new(
            cfg.clone(),
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&pool),
            factory.clone(),
        );

        Self {
            cfg,
            store,
            bus,
            pool,
            api,
            factory,
            supervisor,
            service,
            _dir: dir,
        }
    }

    pub async fn add_account(&self, email: &str, credits: i64) -> i64 {
        self.store
            .add_account("sora", email, None, Some("tok"), credits)
            .await
            .expect("add account")
    }

    /// Poll the store until the job reaches `target` (or a bounded number of
    /// virtual-time ticks elapses).
    pub async fn wait_for_status(&self, id: JobId, target: JobStatus) -> vgen_core::store::Job {
        for _ in 0..4000 {
            let job = self
                .store
                .get_job(id)
                .await
                .expect("get job")
                .expect("job exists");
            if job.progress.status == target {
                return job;
            }
            if job.progress.status.is_terminal() {
                panic!(
                    "job {id} ended in {:?} (error: {:?}) while waiting for {:?}",
                    job.progress.status, job.progress.error_message, target
                );
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
        panic!("job {id} never reached {target:?}");
    }

    /// Poll the store until the job lands in any terminal status.
    pub async fn wait_for_terminal(&self, id: JobId) -> vgen_core::store::Job {
        for _ in 0..4000 {
            let job = self
                .store
                .get_job(id)
                .await
                .expect("get job")
                .expect("job exists");
            if job.progress.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
        panic!("job {id} never reached a terminal status");
    }
}
