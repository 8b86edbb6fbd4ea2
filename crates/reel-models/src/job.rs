//! Job identity and status snapshots.
//!
//! A `JobSnapshot` is the full, immutable view of a job that gets pushed to
//! status callbacks and stores. Only the orchestrator's status reporter
//! produces new snapshots.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    ProcessingText,
    GeneratingAudio,
    MergingAudio,
    Transcribing,
    AnalyzingScenes,
    SelectingMusic,
    GeneratingImages,
    MixingAudio,
    ComposingVideo,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::ProcessingText => "processing_text",
            JobStatus::GeneratingAudio => "generating_audio",
            JobStatus::MergingAudio => "merging_audio",
            JobStatus::Transcribing => "transcribing",
            JobStatus::AnalyzingScenes => "analyzing_scenes",
            JobStatus::SelectingMusic => "selecting_music",
            JobStatus::GeneratingImages => "generating_images",
            JobStatus::MixingAudio => "mixing_audio",
            JobStatus::ComposingVideo => "composing_video",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable view of a job at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSnapshot {
    pub job_id: JobId,

    pub status: JobStatus,

    /// Normalized progress in [0, 1]
    pub progress: f64,

    /// Human-readable label of the current step
    pub current_step: String,

    /// Free-form stage details (chunk counts, result metadata, ...)
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,

    /// Chronological log lines, capped by the reporter
    #[serde(default)]
    pub logs: Vec<String>,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Create a pending snapshot for a new job.
    pub fn new(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Pending,
            progress: 0.0,
            current_step: "Waiting".to_string(),
            details: BTreeMap::new(),
            logs: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// Append a log line, dropping the oldest lines beyond `cap`.
    pub fn push_log(&mut self, line: impl Into<String>, cap: usize) {
        self.logs.push(line.into());
        if self.logs.len() > cap {
            let excess = self.logs.len() - cap;
            self.logs.drain(..excess);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
