//! Types used by the job/account store.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Job identifier.
pub type JobId = i64;

/// Account identifier.
pub type AccountId = i64;

/// High-level job status stored as a string in the database.
///
/// `SentPrompt` is never produced by the current pipeline but remains
/// parseable so rows written by older deployments keep working; recovery and
/// the active-status filters treat it like `Processing`. The legacy
/// `"completed"` string maps onto `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Draft,
    Pending,
    Processing,
    SentPrompt,
    Generating,
    Download,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::SentPrompt => "sent_prompt",
            JobStatus::Generating => "generating",
            JobStatus::Download => "download",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "draft" => JobStatus::Draft,
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "sent_prompt" => JobStatus::SentPrompt,
            "generating" => JobStatus::Generating,
            "download" => JobStatus::Download,
            "done" | "completed" => JobStatus::Done,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Active statuses are owned by some worker stage.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending
                | JobStatus::Processing
                | JobStatus::SentPrompt
                | JobStatus::Generating
                | JobStatus::Download
        )
    }

    /// Whether `next` is a legal worker-driven transition from `self`.
    ///
    /// Administrative operations (startup recovery, system reset) move jobs
    /// outside this machine on purpose and are not checked against it.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Draft, Pending) => true,
            (Pending, Processing) => true,
            (Processing, Generating) | (SentPrompt, Generating) => true,
            (Generating, Download) => true,
            (Download, Done) => true,
            (Pending | Processing | SentPrompt | Generating | Download, Failed) => true,
            (Pending | Processing | SentPrompt | Generating, Cancelled) => true,
            (Failed | Cancelled, Pending) => true,
            _ => false,
        }
    }
}

/// Immutable generation parameters, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub prompt: String,
    pub image_path: Option<String>,
    /// Clip length in seconds.
    pub duration: i64,
    pub aspect_ratio: String,
}

pub const VALID_DURATIONS: [i64; 3] = [5, 10, 15];
pub const VALID_ASPECT_RATIOS: [&str; 3] = ["16:9", "9:16", "1:1"];

impl JobSpec {
    pub fn new(
        prompt: impl Into<String>,
        duration: i64,
        aspect_ratio: impl Into<String>,
        image_path: Option<String>,
    ) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            bail!("prompt cannot be empty");
        }
        if !VALID_DURATIONS.contains(&duration) {
            bail!("duration must be 5, 10, or 15 seconds (got {duration})");
        }
        let aspect_ratio = aspect_ratio.into();
        if !VALID_ASPECT_RATIOS.contains(&aspect_ratio.as_str()) {
            bail!("aspect_ratio must be one of {VALID_ASPECT_RATIOS:?} (got {aspect_ratio:?})");
        }
        Ok(Self {
            prompt,
            image_path,
            duration,
            aspect_ratio,
        })
    }

    /// Orientation keyword some remote endpoints want instead of a ratio.
    pub fn orientation(&self) -> &'static str {
        match self.aspect_ratio.as_str() {
            "16:9" => "landscape",
            "9:16" => "portrait",
            _ => "square",
        }
    }
}

/// Mutable progress bookkeeping.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub status: JobStatus,
    /// 0..=100.
    pub percent: i64,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            status: JobStatus::Draft,
            percent: 0,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
        }
    }
}

/// Outputs populated as the job advances through the stages.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub video_url: Option<String>,
    pub video_id: Option<String>,
    pub generation_id: Option<String>,
    pub local_path: Option<String>,
}

/// Per-stage record inside the persisted `task_state` blob.
///
/// Unknown keys written by other versions ride along in `extra` so a partial
/// update never clobbers them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageState {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StageState {
    pub fn pending() -> Self {
        Self {
            status: "pending".to_string(),
            ..Self::default()
        }
    }
}

/// Structured sub-task progress, stored as a JSON column.
///
/// Readers must tolerate missing sub-keys; writers go through
/// read-modify-write of the decoded struct so unrelated sub-keys survive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskState {
    #[serde(default)]
    pub tasks: BTreeMap<String, StageState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_clean_video: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TaskState {
    /// Upsert one stage entry, merging into whatever is already recorded.
    pub fn set_stage(&mut self, name: &str, stage: StageState) {
        match self.tasks.get_mut(name) {
            Some(existing) => {
                existing.status = stage.status;
                if stage.task_id.is_some() {
                    existing.task_id = stage.task_id;
                }
                if stage.completed_at.is_some() {
                    existing.completed_at = stage.completed_at;
                }
                if stage.error.is_some() {
                    existing.error = stage.error;
                }
            }
            None => {
                self.tasks.insert(name.to_string(), stage);
            }
        }
    }
}

/// Full job record used by the workers and the CLI.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub progress: JobProgress,
    pub result: JobResult,
    pub account_id: Option<AccountId>,
    pub task_state: Option<TaskState>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn can_start(&self) -> bool {
        matches!(self.progress.status, JobStatus::Draft | JobStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        self.progress.status.is_active()
    }

    pub fn can_retry(&self) -> bool {
        matches!(self.progress.status, JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn task_state_mut(&mut self) -> &mut TaskState {
        self.task_state.get_or_insert_with(TaskState::default)
    }
}

/// Listing category used by the CLI and the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCategory {
    /// Draft plus every worker-owned status.
    Active,
    /// Terminal statuses.
    History,
}

impl JobCategory {
    pub fn statuses(self) -> &'static [&'static str] {
        match self {
            JobCategory::Active => &[
                "draft",
                "pending",
                "processing",
                "sent_prompt",
                "generating",
                "download",
            ],
            JobCategory::History => &["done", "completed", "failed", "cancelled"],
        }
    }
}

/// Account status stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Live,
    Cooldown,
    Expired,
    PhoneRequired,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Live => "live",
            AccountStatus::Cooldown => "cooldown",
            AccountStatus::Expired => "expired",
            AccountStatus::PhoneRequired => "phone_required",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "live" => AccountStatus::Live,
            "cooldown" => AccountStatus::Cooldown,
            "phone_required" => AccountStatus::PhoneRequired,
            _ => AccountStatus::Expired,
        }
    }
}

/// Per-account remote session material.
#[derive(Debug, Clone, Default)]
pub struct AccountSession {
    pub access_token: Option<String>,
    /// Stable per-account identifier the remote service keys behavior on.
    /// Synthesized once and reused for every subsequent call.
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
    pub cookies: Option<String>,
}

/// Account record.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub platform: String,
    pub email: String,
    /// Encrypted at rest by the importer; opaque here.
    pub password_enc: Option<String>,
    pub session: AccountSession,
    pub credits_remaining: i64,
    pub credits_last_checked: Option<i64>,
    pub credits_reset_at: Option<i64>,
    pub status: AccountStatus,
    pub last_used: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Aggregate counts surfaced by the queue-status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbStats {
    pub completed: i64,
    pub pending: i64,
    pub failed: i64,
    pub processing: i64,
}

/// Account totals surfaced by the queue-status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStats {
    pub total: i64,
    pub with_credits: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for st in [
            JobStatus::Draft,
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::SentPrompt,
            JobStatus::Generating,
            JobStatus::Download,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(st.as_str()), st);
        }
        // Legacy alias collapses onto done.
        assert_eq!(JobStatus::from_str("completed"), JobStatus::Done);
        assert_eq!(JobStatus::from_str("garbage"), JobStatus::Failed);
    }

    #[test]
    fn terminal_and_active_partition() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        for st in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::SentPrompt,
            JobStatus::Generating,
            JobStatus::Download,
        ] {
            assert!(st.is_active());
            assert!(!st.is_terminal());
        }
        assert!(!JobStatus::Draft.is_active());
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use JobStatus::*;
        assert!(Draft.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Download));
        assert!(Download.can_transition_to(Done));
        assert!(Generating.can_transition_to(Failed));
        assert!(Download.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Pending));
        assert!(Cancelled.can_transition_to(Pending));

        // Illegal edges.
        assert!(!Draft.can_transition_to(Generating));
        assert!(!Download.can_transition_to(Cancelled));
        assert!(!Done.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Generating.can_transition_to(Pending));
    }

    #[test]
    fn spec_validation() {
        assert!(JobSpec::new("a sunset", 5, "16:9", None).is_ok());
        assert!(JobSpec::new("   ", 5, "16:9", None).is_err());
        assert!(JobSpec::new("x", 7, "16:9", None).is_err());
        assert!(JobSpec::new("x", 10, "4:3", None).is_err());

        let spec = JobSpec::new("x", 10, "9:16", None).unwrap();
        assert_eq!(spec.orientation(), "portrait");
    }

    #[test]
    fn task_state_roundtrip_preserves_unknown_keys() {
        let raw = r#"{
            "tasks": {
                "generate": {"status": "completed", "task_id": "T1", "credits_spent": 4},
                "poll": {"status": "pending"}
            },
            "current_task": "poll",
            "legacy_flag": true
        }"#;
        let mut state: TaskState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.tasks["generate"].status, "completed");
        assert_eq!(state.tasks["generate"].task_id.as_deref(), Some("T1"));
        assert_eq!(state.current_task.as_deref(), Some("poll"));

        // Partial update of one stage must not clobber siblings or extras.
        state.set_stage("poll", StageState {
            status: "completed".to_string(),
            ..StageState::default()
        });
        state.current_task = Some("download".to_string());

        let out = serde_json::to_value(&state).unwrap();
        assert_eq!(out["tasks"]["generate"]["credits_spent"], 4);
        assert_eq!(out["tasks"]["generate"]["task_id"], "T1");
        assert_eq!(out["tasks"]["poll"]["status"], "completed");
        assert_eq!(out["legacy_flag"], true);
    }

    #[test]
    fn set_stage_merges_existing_entry() {
        let mut state = TaskState::default();
        state.set_stage("generate", StageState {
            status: "completed".to_string(),
            task_id: Some("T9".to_string()),
            completed_at: Some(1_700_000_000),
            ..StageState::default()
        });
        // A later status-only write keeps the recorded task id.
        state.set_stage("generate", StageState {
            status: "failed".to_string(),
            error: Some("boom".to_string()),
            ..StageState::default()
        });
        let gen = &state.tasks["generate"];
        assert_eq!(gen.status, "failed");
        assert_eq!(gen.task_id.as_deref(), Some("T9"));
        assert_eq!(gen.error.as_deref(), Some("boom"));
    }
}
