//! Script batches processed one job at a time.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::JobId;

/// Maximum stored length of an item error message.
pub const MAX_ITEM_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl BatchItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchItemStatus::Pending => "pending",
            BatchItemStatus::Processing => "processing",
            BatchItemStatus::Completed => "completed",
            BatchItemStatus::Failed => "failed",
            BatchItemStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    #[default]
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Processing => "processing",
            BatchState::Paused => "paused",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Failed | BatchState::Cancelled
        )
    }
}

/// A script submitted as part of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
}

impl ScriptInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            title: None,
            text: text.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchItem {
    pub id: String,
    pub title: String,
    pub text: String,
    pub status: BatchItemStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// Mirror of the running job's progress
    pub progress: f64,

    #[serde(default)]
    pub current_step: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            status: BatchItemStatus::Pending,
            job_id: None,
            progress: 0.0,
            current_step: String::new(),
            video_path: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        }
    }

    pub fn start(&mut self, job_id: JobId) {
        self.status = BatchItemStatus::Processing;
        self.job_id = Some(job_id);
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, video_path: PathBuf) {
        self.status = BatchItemStatus::Completed;
        self.progress = 1.0;
        self.video_path = Some(video_path);
        self.finish();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error: String = error.into();
        self.status = BatchItemStatus::Failed;
        self.error = Some(error.chars().take(MAX_ITEM_ERROR_LEN).collect());
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_seconds = Some((now - started).num_milliseconds() as f64 / 1000.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchStatus {
    pub batch_id: String,
    pub name: String,
    pub status: BatchState,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_index: Option<usize>,

    /// Overall progress in [0, 1]
    pub progress: f64,

    pub items: Vec<BatchItem>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchStatus {
    pub fn new(batch_id: impl Into<String>, name: impl Into<String>, items: Vec<BatchItem>) -> Self {
        Self {
            batch_id: batch_id.into(),
            name: name.into(),
            status: BatchState::Pending,
            total_items: items.len(),
            completed_items: 0,
            failed_items: 0,
            current_item_index: None,
            progress: 0.0,
            items,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Recompute counters and overall progress.
    ///
    /// Progress is `(completed + failed + current_fraction) / total`, where the
    /// current fraction comes from the item being processed.
    pub fn refresh_progress(&mut self) {
        self.completed_items = self
            .items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Completed)
            .count();
        self.failed_items = self
            .items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Failed)
            .count();

        if self.total_items == 0 {
            self.progress = 1.0;
            return;
        }

        let current = self
            .current_item_index
            .and_then(|idx| self.items.get(idx))
            .filter(|item| item.status == BatchItemStatus::Processing)
            .map(|item| item.progress.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let done = (self.completed_items + self.failed_items) as f64;
        self.progress = ((done + current) / self.total_items as f64).clamp(0.0, 1.0);
    }
}
