//! reqwest-backed implementation of the remote video-generation API.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::classify::{classify, classify_message};
use super::{
    ApiError, Completion, CompletionStatus, PendingTask, Submitted, VideoApi, VideoApiFactory,
};
use crate::store::{Account, JobSpec};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
/// Delay between status probes inside `wait_for_completion`.
const STATUS_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Per-account HTTP client for the generation service.
///
/// All requests carry the account's bearer token, device id, and user agent;
/// the service conditions behavior on device continuity, so the device id
/// must be stable across calls.
pub struct HttpVideoApi {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    device_id: String,
    user_agent: String,
    cookies: Option<String>,
}

impl HttpVideoApi {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        device_id: impl Into<String>,
        user_agent: Option<String>,
        cookies: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_token: access_token.into(),
            device_id: device_id.into(),
            user_agent: user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            cookies,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
            .header("User-Agent", &self.user_agent)
            .header("OAI-Device-Id", &self.device_id)
            .header("Accept", "*/*");
        if let Some(cookies) = &self.cookies {
            builder = builder.header("Cookie", cookies);
        }
        builder
    }

    /// Send a request and decode the JSON body, classifying failures.
    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = classify(status.as_u16(), &body);
            let snippet: String = body.chars().take(200).collect();
            return Err(ApiError::new(
                kind,
                format!("HTTP {}: {snippet}", status.as_u16()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::transient(format!("bad response body: {e}")))
    }

    async fn fetch_task(&self, task_id: &str) -> Result<TaskStatusBody, ApiError> {
        self.send_json(
            self.request(
                reqwest::Method::GET,
                &format!("/backend/project_y/video_gen/{task_id}"),
            ),
        )
        .await
    }
}

#[derive(Deserialize)]
struct SubmitBody {
    #[serde(default)]
    task_id: Option<String>,
    /// Some rejections (heavy load, concurrency caps) come back inside a
    /// 200 envelope rather than as an HTTP error.
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PendingBody {
    #[serde(default)]
    items: Vec<PendingItem>,
}

#[derive(Deserialize)]
struct PendingItem {
    id: String,
    #[serde(default)]
    prompt: Option<String>,
    /// Completion fraction in [0, 1].
    #[serde(default)]
    progress_pct: f64,
}

#[derive(Deserialize)]
struct TaskStatusBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    generation_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct CreditsBody {
    credits_remaining: i64,
}

#[async_trait]
impl VideoApi for HttpVideoApi {
    async fn submit(&self, spec: &JobSpec) -> Result<Submitted, ApiError> {
        let payload = serde_json::json!({
            "prompt": spec.prompt,
            "n_seconds": spec.duration,
            "orientation": spec.orientation(),
            "aspect_ratio": spec.aspect_ratio,
            "image_path": spec.image_path,
        });

        let body: SubmitBody = self
            .send_json(
                self.request(reqwest::Method::POST, "/backend/project_y/video_gen")
                    .json(&payload),
            )
            .await?;

        if let Some(error) = body.error {
            return Err(ApiError::new(classify_message(&error), error));
        }
        match body.task_id {
            Some(task_id) => Ok(Submitted { task_id }),
            None => Err(ApiError::transient("submit response carried no task id")),
        }
    }

    async fn list_pending(&self) -> Result<Vec<PendingTask>, ApiError> {
        let body: PendingBody = self
            .send_json(
                self.request(reqwest::Method::GET, "/backend/project_y/pending")
                    .query(&[("limit", "20")]),
            )
            .await?;

        Ok(body
            .items
            .into_iter()
            .map(|item| PendingTask {
                id: item.id,
                prompt: item.prompt,
                progress_fraction: item.progress_pct.clamp(0.0, 1.0),
            })
            .collect())
    }

    async fn wait_for_completion(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Option<Completion>, ApiError> {
        let deadline = Instant::now() + timeout;
        loop {
            let body = self.fetch_task(task_id).await?;
            match body.status.as_str() {
                "succeeded" | "success" | "completed" => {
                    return Ok(Some(Completion {
                        status: CompletionStatus::Success,
                        download_url: body.download_url,
                        video_id: body.id,
                        generation_id: body.generation_id,
                        error: None,
                    }));
                }
                "failed" | "rejected" => {
                    return Ok(Some(Completion {
                        status: CompletionStatus::Failed,
                        download_url: None,
                        video_id: body.id,
                        generation_id: body.generation_id,
                        error: body.error,
                    }));
                }
                _ => {
                    if Instant::now() + STATUS_PROBE_INTERVAL > deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(STATUS_PROBE_INTERVAL).await;
                }
            }
        }
    }

    async fn get_credits(&self) -> Result<i64, ApiError> {
        let body: CreditsBody = self
            .send_json(self.request(reqwest::Method::GET, "/backend/project_y/profile/credits"))
            .await?;
        Ok(body.credits_remaining)
    }
}

/// Factory producing per-account [`HttpVideoApi`] clients that share one
/// connection pool.
pub struct HttpApiFactory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpApiFactory {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl VideoApiFactory for HttpApiFactory {
    fn client_for(&self, account: &Account) -> Arc<dyn VideoApi> {
        Arc::new(HttpVideoApi::new(
            self.http.clone(),
            self.base_url.clone(),
            account.session.access_token.clone().unwrap_or_default(),
            account.session.device_id.clone().unwrap_or_default(),
            account.session.user_agent.clone(),
            account.session.cookies.clone(),
        ))
    }
}
