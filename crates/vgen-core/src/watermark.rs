//! Watermark-removal collaborator.
//!
//! A single best-effort call: given a finished video, either a clean
//! (watermark-free) download URL comes back or nothing does. The downloader
//! swallows every failure here and falls back to the original URL.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::store::Account;

#[async_trait]
pub trait WatermarkRemover: Send + Sync {
    /// Try to obtain a clean URL for `video_id`. `Ok(None)` means the
    /// service declined; errors are treated the same way by callers.
    async fn clean_url(
        &self,
        account: &Account,
        video_id: &str,
        generation_id: Option<&str>,
        title: &str,
    ) -> Result<Option<String>>;
}

/// HTTP implementation posting the video through the platform's share flow,
/// which re-renders it without the overlay.
pub struct HttpWatermarkRemover {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWatermarkRemover {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct CleanBody {
    #[serde(default)]
    clean_url: Option<String>,
}

#[async_trait]
impl WatermarkRemover for HttpWatermarkRemover {
    async fn clean_url(
        &self,
        account: &Account,
        video_id: &str,
        generation_id: Option<&str>,
        title: &str,
    ) -> Result<Option<String>> {
        let token = account
            .session
            .access_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("account {} has no access token", account.id))?;

        let payload = serde_json::json!({
            "video_id": video_id,
            "generation_id": generation_id,
            "title": title,
        });

        let response = self
            .http
            .post(format!("{}/backend/project_y/post", self.base_url))
            .bearer_auth(token)
            .header(
                "User-Agent",
                account.session.user_agent.as_deref().unwrap_or("Mozilla/5.0"),
            )
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("watermark removal returned HTTP {}", response.status());
        }

        let body: CleanBody = response.json().await?;
        Ok(body.clean_url)
    }
}
