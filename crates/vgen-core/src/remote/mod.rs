//! Remote video-generation API boundary.
//!
//! The pipeline only ever talks to the remote service through [`VideoApi`],
//! so tests (and alternative platforms) plug in their own implementation.
//! Error strings are classified into [`ApiErrorKind`] at this boundary; the
//! workers dispatch on the kind, never on message text.

pub mod classify;
pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{Account, JobSpec};

/// Closed classification of remote failures. Each kind maps to one retry
/// policy in the generate worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Service is shedding load; retry the same account after a pause.
    HeavyLoad,
    /// Account hit its concurrent-generation cap; switch accounts.
    TooManyConcurrentTasks,
    /// Account needs phone verification before it can generate again.
    PhoneRequired,
    /// Quota or credit exhaustion on the account.
    NoCredits,
    /// Token rejected or expired.
    Unauthorized,
    /// Anything else (network, 5xx, unknown payloads).
    Transient,
}

/// Error returned by the remote adapter, tagged with its kind.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transient, message)
    }
}

/// Accepted submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub task_id: String,
}

/// One entry of the remote pending queue.
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub id: String,
    pub prompt: Option<String>,
    /// Completion fraction in [0, 1].
    pub progress_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Terminal outcome reported by the remote service for one task.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: CompletionStatus,
    pub download_url: Option<String>,
    pub video_id: Option<String>,
    pub generation_id: Option<String>,
    pub error: Option<String>,
}

/// The four operations the pipeline depends on.
///
/// `wait_for_completion` returns `Ok(None)` when the task is still pending
/// after `timeout`; a `Some` carries either success or failure.
#[async_trait]
pub trait VideoApi: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<Submitted, ApiError>;

    async fn list_pending(&self) -> Result<Vec<PendingTask>, ApiError>;

    async fn wait_for_completion(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Option<Completion>, ApiError>;

    async fn get_credits(&self) -> Result<i64, ApiError>;
}

/// Builds a per-account client. The session's access token, device id, and
/// user agent become request headers; the same device id must be presented
/// on every call for a given account.
pub trait VideoApiFactory: Send + Sync {
    fn client_for(&self, account: &Account) -> Arc<dyn VideoApi>;
}
