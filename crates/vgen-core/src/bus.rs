//! TaskBus: the three stage queues plus the process-wide active job set.
//!
//! Queues are bounded FIFOs; the active set guarantees at most one worker
//! owns a job at a time. `start_job` is the single entry point for new work
//! and is idempotent under concurrent calls.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::config::VgenConfig;
use crate::store::{AccountId, JobId};

/// Which worker fleet a task is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Generate,
    Poll,
    Download,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Generate => "generate",
            TaskType::Poll => "poll",
            TaskType::Download => "download",
        }
    }
}

/// Hints and per-error-class retry counters carried between stages.
///
/// Counters live here (not on the job row) so they survive re-enqueues and
/// stay independent per error class, and reset naturally when a job is
/// retried from scratch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub task_id: Option<String>,
    pub account_id: Option<AccountId>,
    pub video_url: Option<String>,
    pub video_id: Option<String>,
    pub generation_id: Option<String>,

    /// Accounts that failed this job; skipped by subsequent acquires.
    #[serde(default)]
    pub exclude_account_ids: Vec<AccountId>,

    #[serde(default)]
    pub poll_count: u32,
    #[serde(default)]
    pub no_account_retry_count: u32,
    #[serde(default)]
    pub heavy_load_retry_count: u32,
    #[serde(default)]
    pub concurrent_retry_count: u32,
    #[serde(default)]
    pub account_switch_retry_count: u32,
    #[serde(default)]
    pub api_retry_count: u32,
}

/// In-queue envelope: which job, which stage, and the stage inputs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job_id: JobId,
    pub task_type: TaskType,
    pub input: TaskInput,
}

impl TaskContext {
    pub fn generate(job_id: JobId) -> Self {
        Self {
            job_id,
            task_type: TaskType::Generate,
            input: TaskInput::default(),
        }
    }

    pub fn poll(job_id: JobId, input: TaskInput) -> Self {
        Self {
            job_id,
            task_type: TaskType::Poll,
            input,
        }
    }

    pub fn download(job_id: JobId, input: TaskInput) -> Self {
        Self {
            job_id,
            task_type: TaskType::Download,
            input,
        }
    }
}

/// Back-pressure and lifecycle failures surfaced to producers.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The target queue is at capacity; callers should surface a
    /// service-unavailable condition instead of dropping the task.
    #[error("{queue} queue is full")]
    QueueFull { queue: &'static str },
    #[error("task bus is shut down")]
    Closed,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone)]
pub struct BusStatus {
    pub paused: bool,
    pub generate_queue_size: usize,
    pub poll_queue_size: usize,
    pub download_queue_size: usize,
    pub active_count: usize,
    pub active_ids: Vec<JobId>,
}

struct Queue {
    tx: mpsc::Sender<TaskContext>,
    rx: Mutex<mpsc::Receiver<TaskContext>>,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

pub struct TaskBus {
    generate: Queue,
    poll: Queue,
    download: Queue,
    active: StdMutex<HashSet<JobId>>,
    paused: AtomicBool,
}

impl TaskBus {
    pub fn new(cfg: &VgenConfig) -> Self {
        Self {
            generate: Queue::new(cfg.generate_queue_capacity),
            poll: Queue::new(cfg.poll_queue_capacity),
            download: Queue::new(cfg.download_queue_capacity),
            active: StdMutex::new(HashSet::new()),
            paused: AtomicBool::new(false),
        }
    }

    fn queue(&self, ty: TaskType) -> &Queue {
        match ty {
            TaskType::Generate => &self.generate,
            TaskType::Poll => &self.poll,
            TaskType::Download => &self.download,
        }
    }

    /// Begin work for a job: register it in the active set and enqueue a
    /// generate task. Returns false (without enqueuing) when the job is
    /// already active, making concurrent starts idempotent. On a full queue
    /// the registration is rolled back so a later start can succeed.
    pub fn start_job(&self, job_id: JobId) -> Result<bool, BusError> {
        if !self.track(job_id) {
            tracing::debug!("job {job_id} already active, skipping enqueue");
            return Ok(false);
        }
        match self.try_enqueue(TaskContext::generate(job_id)) {
            Ok(()) => Ok(true),
            Err(err) => {
                self.release(job_id);
                Err(err)
            }
        }
    }

    /// Non-blocking enqueue; fails with `QueueFull` under back-pressure.
    pub fn try_enqueue(&self, task: TaskContext) -> Result<(), BusError> {
        let queue = self.queue(task.task_type);
        let name = task.task_type.as_str();
        queue.tx.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => BusError::QueueFull { queue: name },
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })
    }

    /// Blocking enqueue used by workers handing a job to the next stage or
    /// re-enqueueing a retry; waits for a slot instead of dropping.
    pub async fn enqueue(&self, task: TaskContext) -> Result<(), BusError> {
        let queue = self.queue(task.task_type);
        queue.tx.send(task).await.map_err(|_| BusError::Closed)
    }

    /// Bounded-wait dequeue. Returns None when the wait times out.
    pub async fn recv(&self, ty: TaskType, timeout: Duration) -> Option<TaskContext> {
        let mut rx = self.queue(ty).rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(task)) => Some(task),
            Ok(None) | Err(_) => None,
        }
    }

    /// Insert into the active set. Returns false if already present.
    pub fn track(&self, job_id: JobId) -> bool {
        self.active.lock().unwrap().insert(job_id)
    }

    /// Remove from the active set (terminal outcome or stage hand-off that
    /// re-registers via enqueue paths).
    pub fn release(&self, job_id: JobId) {
        self.active.lock().unwrap().remove(&job_id);
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        self.active.lock().unwrap().contains(&job_id)
    }

    /// Drop every active registration (administrative reset).
    pub fn clear_active(&self) {
        self.active.lock().unwrap().clear();
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("task bus paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("task bus resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> BusStatus {
        let active = self.active.lock().unwrap();
        let mut active_ids: Vec<JobId> = active.iter().copied().collect();
        active_ids.sort_unstable();
        BusStatus {
            paused: self.is_paused(),
            generate_queue_size: self.generate.len(),
            poll_queue_size: self.poll.len(),
            download_queue_size: self.download.len(),
            active_count: active.len(),
            active_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_bus() -> TaskBus {
        let mut cfg = VgenConfig::default();
        cfg.generate_queue_capacity = 2;
        cfg.poll_queue_capacity = 2;
        cfg.download_queue_capacity = 1;
        TaskBus::new(&cfg)
    }

    #[tokio::test]
    async fn start_job_is_idempotent() {
        let bus = small_bus();
        assert!(bus.start_job(1).unwrap());
        assert!(!bus.start_job(1).unwrap());
        assert!(bus.is_active(1));

        // Only one generate task was enqueued.
        assert!(bus
            .recv(TaskType::Generate, Duration::from_millis(10))
            .await
            .is_some());
        assert!(bus
            .recv(TaskType::Generate, Duration::from_millis(10))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn start_job_surfaces_backpressure_and_rolls_back() {
        let bus = small_bus();
        assert!(bus.start_job(1).unwrap());
        assert!(bus.start_job(2).unwrap());
        // Queue capacity is 2; the third start must fail loudly...
        let err = bus.start_job(3).unwrap_err();
        assert!(matches!(err, BusError::QueueFull { queue: "generate" }));
        // ...and must not leave the job stuck in the active set.
        assert!(!bus.is_active(3));

        // Draining a slot lets the job start afterwards.
        bus.recv(TaskType::Generate, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(bus.start_job(3).unwrap());
    }

    #[tokio::test]
    async fn recv_times_out_on_empty_queue() {
        let bus = small_bus();
        let got = bus.recv(TaskType::Poll, Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn status_snapshot_reflects_queues_and_active_set() {
        let bus = small_bus();
        bus.start_job(5).unwrap();
        bus.try_enqueue(TaskContext::poll(6, TaskInput::default()))
            .unwrap();
        bus.track(6);
        bus.pause();

        let status = bus.status();
        assert!(status.paused);
        assert_eq!(status.generate_queue_size, 1);
        assert_eq!(status.poll_queue_size, 1);
        assert_eq!(status.download_queue_size, 0);
        assert_eq!(status.active_count, 2);
        assert_eq!(status.active_ids, vec![5, 6]);

        bus.resume();
        assert!(!bus.status().paused);
    }

    #[tokio::test]
    async fn release_and_clear_active() {
        let bus = small_bus();
        bus.track(1);
        bus.track(2);
        bus.release(1);
        assert!(!bus.is_active(1));
        assert!(bus.is_active(2));
        bus.clear_active();
        assert_eq!(bus.status().active_count, 0);
    }

    #[test]
    fn task_input_counters_roundtrip_as_json() {
        let mut input = TaskInput::default();
        input.heavy_load_retry_count = 3;
        input.exclude_account_ids = vec![4, 9];
        input.task_id = Some("T1".to_string());

        let json = serde_json::to_string(&input).unwrap();
        let back: TaskInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.heavy_load_retry_count, 3);
        assert_eq!(back.exclude_account_ids, vec![4, 9]);
        assert_eq!(back.task_id.as_deref(), Some("T1"));
        // Missing counters decode as zero.
        let sparse: TaskInput = serde_json::from_str(r#"{"task_id":"X"}"#).unwrap();
        assert_eq!(sparse.poll_count, 0);
        assert!(sparse.exclude_account_ids.is_empty());
    }
}
