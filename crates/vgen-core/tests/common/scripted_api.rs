//! Scripted in-process stand-ins for the remote API and the watermark
//! collaborator.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vgen_core::remote::{
    ApiError, ApiErrorKind, Completion, CompletionStatus, PendingTask, Submitted, VideoApi,
    VideoApiFactory,
};
use vgen_core::store::{Account, JobSpec};
use vgen_core::watermark::WatermarkRemover;

/// One scripted answer for `wait_for_completion`.
pub enum CompletionStep {
    /// Still pending after the call's timeout.
    Pending,
    Done(Completion),
}

/// Remote API whose responses are driven by per-operation scripts. Scripts
/// are consumed front to back; an exhausted submit script fails the test,
/// an exhausted completion script keeps reporting "pending".
#[derive(Default)]
pub struct ScriptedApi {
    submit_script: Mutex<VecDeque<Result<Submitted, ApiError>>>,
    completion_script: Mutex<VecDeque<CompletionStep>>,
    pending_list: Mutex<Vec<PendingTask>>,
    pub submit_calls: Mutex<u32>,
    pub completion_calls: Mutex<u32>,
}

impl ScriptedApi {
    pub fn push_submit_ok(&self, task_id: &str) {
        self.submit_script.lock().unwrap().push_back(Ok(Submitted {
            task_id: task_id.to_string(),
        }));
    }

    pub fn push_submit_err(&self, kind: ApiErrorKind, message: &str) {
        self.submit_script
            .lock()
            .unwrap()
            .push_back(Err(ApiError::new(kind, message)));
    }

    pub fn push_completion_pending(&self) {
        self.completion_script
            .lock()
            .unwrap()
            .push_back(CompletionStep::Pending);
    }

    pub fn push_completion_success(&self, url: &str, video_id: &str) {
        self.completion_script
            .lock()
            .unwrap()
            .push_back(CompletionStep::Done(Completion {
                status: CompletionStatus::Success,
                download_url: Some(url.to_string()),
                video_id: Some(video_id.to_string()),
                generation_id: Some(format!("gen-{video_id}")),
                error: None,
            }));
    }

    pub fn push_completion_failed(&self, error: &str) {
        self.completion_script
            .lock()
            .unwrap()
            .push_back(CompletionStep::Done(Completion {
                status: CompletionStatus::Failed,
                download_url: None,
                video_id: None,
                generation_id: None,
                error: Some(error.to_string()),
            }));
    }

    pub fn set_pending_list(&self, tasks: Vec<PendingTask>) {
        *self.pending_list.lock().unwrap() = tasks;
    }

    pub fn submit_count(&self) -> u32 {
        *self.submit_calls.lock().unwrap()
    }
}

#[async_trait]
impl VideoApi for ScriptedApi {
    async fn submit(&self, _spec: &JobSpec) -> Result<Submitted, ApiError> {
        *self.submit_calls.lock().unwrap() += 1;
        self.submit_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected submit call (script exhausted)"))
    }

    async fn list_pending(&self) -> Result<Vec<PendingTask>, ApiError> {
        Ok(self.pending_list.lock().unwrap().clone())
    }

    async fn wait_for_completion(
        &self,
        _task_id: &str,
        _timeout: Duration,
    ) -> Result<Option<Completion>, ApiError> {
        *self.completion_calls.lock().unwrap() += 1;
        match self.completion_script.lock().unwrap().pop_front() {
            Some(CompletionStep::Done(done)) => Ok(Some(done)),
            Some(CompletionStep::Pending) | None => Ok(None),
        }
    }

    async fn get_credits(&self) -> Result<i64, ApiError> {
        Ok(10)
    }
}

/// Factory handing every account the same scripted API, recording which
/// accounts asked for a client (submission order is observable this way).
pub struct ScriptedFactory {
    api: Arc<ScriptedApi>,
    pub accounts_seen: Mutex<Vec<i64>>,
}

impl ScriptedFactory {
    pub fn new(api: Arc<ScriptedApi>) -> Self {
        Self {
            api,
            accounts_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<i64> {
        self.accounts_seen.lock().unwrap().clone()
    }
}

impl VideoApiFactory for ScriptedFactory {
    fn client_for(&self, account: &Account) -> Arc<dyn VideoApi> {
        self.accounts_seen.lock().unwrap().push(account.id);
        self.api.clone()
    }
}

/// Watermark collaborator that always declines; downloads keep the original
/// URL.
pub struct NoopWatermark;

#[async_trait]
impl WatermarkRemover for NoopWatermark {
    async fn clean_url(
        &self,
        _account: &Account,
        _video_id: &str,
        _generation_id: Option<&str>,
        _title: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }
}
