//! Job status reporting.
//!
//! A job's snapshot has exactly one writer: the reporter task spawned by
//! [`StatusReporter::spawn`]. Stages send events through cheap, cloneable
//! [`StatusHandle`]s (usable from synchronous progress callbacks); the task
//! applies them in order, stores the new snapshot and hands a clone to every
//! registered sink.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reel_models::{BatchStatus, JobId, JobSnapshot, JobStatus};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WorkerResult;
use crate::store::JobStore;

/// Maximum stored length of a job's error message.
pub const MAX_ERROR_LEN: usize = 500;

/// Receives every new job snapshot.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn on_job_update(&self, snapshot: &JobSnapshot) -> WorkerResult<()>;
}

/// Receives every new batch snapshot.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn on_batch_update(&self, status: &BatchStatus) -> WorkerResult<()>;
}

/// Sink that only traces updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn on_job_update(&self, snapshot: &JobSnapshot) -> WorkerResult<()> {
        debug!(
            job_id = %snapshot.job_id,
            status = %snapshot.status,
            progress = snapshot.progress,
            "{}",
            snapshot.current_step
        );
        Ok(())
    }
}

#[async_trait]
impl BatchSink for LogSink {
    async fn on_batch_update(&self, status: &BatchStatus) -> WorkerResult<()> {
        debug!(
            batch_id = %status.batch_id,
            status = status.status.as_str(),
            progress = status.progress,
            completed = status.completed_items,
            failed = status.failed_items,
            "Batch update"
        );
        Ok(())
    }
}

#[derive(Debug)]
enum StatusEvent {
    Stage {
        status: JobStatus,
        progress: f64,
        step: String,
    },
    Progress {
        progress: f64,
        step: String,
    },
    Detail {
        key: String,
        value: Value,
    },
    Log(String),
    Completed {
        details: BTreeMap<String, Value>,
    },
    Failed {
        error: String,
    },
    Close,
}

/// Sending side of a job's status channel.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusHandle {
    fn send(&self, event: StatusEvent) {
        if self.tx.send(event).is_err() {
            debug!("Status reporter already closed, dropping event");
        }
    }

    /// Enter a new pipeline stage.
    pub fn stage(&self, status: JobStatus, progress: f64, step: impl Into<String>) {
        self.send(StatusEvent::Stage {
            status,
            progress,
            step: step.into(),
        });
    }

    /// Progress within the current stage.
    pub fn progress(&self, progress: f64, step: impl Into<String>) {
        self.send(StatusEvent::Progress {
            progress,
            step: step.into(),
        });
    }

    pub fn detail(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.send(StatusEvent::Detail {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn log(&self, line: impl Into<String>) {
        self.send(StatusEvent::Log(line.into()));
    }

    pub fn complete(&self, details: BTreeMap<String, Value>) {
        self.send(StatusEvent::Completed { details });
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.send(StatusEvent::Failed { error: error.into() });
    }
}

/// Owner of one job's snapshot.
pub struct StatusReporter {
    handle: StatusHandle,
    task: JoinHandle<JobSnapshot>,
}

impl StatusReporter {
    /// Start the reporter task for `job_id`.
    pub fn spawn(
        job_id: JobId,
        max_log_lines: usize,
        store: Arc<dyn JobStore>,
        sinks: Vec<Arc<dyn StatusSink>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut snapshot = JobSnapshot::new(job_id);
            publish(&snapshot, store.as_ref(), &sinks).await;

            while let Some(event) = rx.recv().await {
                if matches!(event, StatusEvent::Close) {
                    break;
                }
                apply(&mut snapshot, event, max_log_lines);
                publish(&snapshot, store.as_ref(), &sinks).await;
            }
            snapshot
        });

        Self {
            handle: StatusHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> StatusHandle {
        self.handle.clone()
    }

    /// Wait for every queued event to be published and stop the task.
    ///
    /// Events sent by handle clones after this call are dropped.
    pub async fn finish(self) -> Option<JobSnapshot> {
        self.handle.send(StatusEvent::Close);
        match self.task.await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Status reporter task failed: {}", e);
                None
            }
        }
    }
}

async fn publish(snapshot: &JobSnapshot, store: &dyn JobStore, sinks: &[Arc<dyn StatusSink>]) {
    store.put_job(snapshot.clone()).await;
    for sink in sinks {
        if let Err(e) = sink.on_job_update(snapshot).await {
            warn!(job_id = %snapshot.job_id, "Status callback failed: {}", e);
        }
    }
}

fn stamp(line: &str) -> String {
    format!("[{}] {}", Utc::now().format("%H:%M:%S"), line)
}

/// Fold one event into the snapshot.
///
/// Progress never moves backwards and terminal snapshots ignore everything
/// except additional log lines.
fn apply(snapshot: &mut JobSnapshot, event: StatusEvent, max_log_lines: usize) {
    let now = Utc::now();
    snapshot.updated_at = now;

    if snapshot.is_terminal() {
        if let StatusEvent::Log(line) = event {
            snapshot.push_log(stamp(&line), max_log_lines);
        }
        return;
    }

    match event {
        StatusEvent::Stage {
            status,
            progress,
            step,
        } => {
            snapshot.status = status;
            snapshot.progress = snapshot.progress.max(progress.clamp(0.0, 1.0));
            snapshot.push_log(stamp(&step), max_log_lines);
            snapshot.current_step = step;
        }
        StatusEvent::Progress { progress, step } => {
            snapshot.progress = snapshot.progress.max(progress.clamp(0.0, 1.0));
            snapshot.current_step = step;
        }
        StatusEvent::Detail { key, value } => {
            snapshot.details.insert(key, value);
        }
        StatusEvent::Log(line) => {
            snapshot.push_log(stamp(&line), max_log_lines);
        }
        StatusEvent::Completed { details } => {
            snapshot.status = JobStatus::Completed;
            snapshot.progress = 1.0;
            snapshot.current_step = "Completed".to_string();
            snapshot.details.extend(details);
            snapshot.completed_at = Some(now);
            snapshot.push_log(stamp("Video ready"), max_log_lines);
        }
        StatusEvent::Failed { error } => {
            let error: String = error.chars().take(MAX_ERROR_LEN).collect();
            snapshot.status = JobStatus::Failed;
            snapshot.current_step = "Failed".to_string();
            snapshot.completed_at = Some(now);
            snapshot.push_log(stamp(&format!("Error: {}", error)), max_log_lines);
            snapshot.error = Some(error);
        }
        StatusEvent::Close => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::store::MemoryJobStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(JobStatus, f64)>>,
    }

    #[async_trait]
    impl StatusSink for Recorder {
        async fn on_job_update(&self, snapshot: &JobSnapshot) -> WorkerResult<()> {
            self.seen
                .lock()
                .unwrap()
                .push((snapshot.status, snapshot.progress));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl StatusSink for Broken {
        async fn on_job_update(&self, _snapshot: &JobSnapshot) -> WorkerResult<()> {
            Err(WorkerError::job_failed("sink offline"))
        }
    }

    #[test]
    fn test_progress_is_monotone() {
        let mut snapshot = JobSnapshot::new(JobId::new());
        apply(
            &mut snapshot,
            StatusEvent::Progress {
                progress: 0.4,
                step: "a".into(),
            },
            10,
        );
        apply(
            &mut snapshot,
            StatusEvent::Progress {
                progress: 0.2,
                step: "b".into(),
            },
            10,
        );
        assert_eq!(snapshot.progress, 0.4);
        assert_eq!(snapshot.current_step, "b");
    }

    #[test]
    fn test_failure_keeps_progress_and_truncates() {
        let mut snapshot = JobSnapshot::new(JobId::new());
        apply(
            &mut snapshot,
            StatusEvent::Stage {
                status: JobStatus::Transcribing,
                progress: 0.3,
                step: "Transcribing".into(),
            },
            10,
        );
        apply(
            &mut snapshot,
            StatusEvent::Failed {
                error: "x".repeat(800),
            },
            10,
        );

        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.progress, 0.3);
        assert_eq!(snapshot.error.as_ref().map(|e| e.len()), Some(MAX_ERROR_LEN));

        // terminal snapshots stay put
        apply(
            &mut snapshot,
            StatusEvent::Stage {
                status: JobStatus::ComposingVideo,
                progress: 0.9,
                step: "late".into(),
            },
            10,
        );
        assert_eq!(snapshot.status, JobStatus::Failed);
    }

    #[test]
    fn test_logs_are_capped() {
        let mut snapshot = JobSnapshot::new(JobId::new());
        for i in 0..10 {
            apply(&mut snapshot, StatusEvent::Log(format!("line {}", i)), 3);
        }
        assert_eq!(snapshot.logs.len(), 3);
        assert!(snapshot.logs[2].ends_with("line 9"));
    }

    #[tokio::test]
    async fn test_reporter_publishes_in_order() {
        let store = Arc::new(MemoryJobStore::new(10));
        let recorder = Arc::new(Recorder::default());
        let job_id = JobId::from_string("job-1");
        let sinks: Vec<Arc<dyn StatusSink>> = vec![recorder.clone(), Arc::new(Broken)];
        let reporter = StatusReporter::spawn(job_id.clone(), 50, store.clone(), sinks);

        let status = reporter.handle();
        status.stage(JobStatus::ProcessingText, 0.05, "Splitting text");
        status.progress(0.15, "Audio 1/2");
        status.detail("chunks", 2);
        status.complete(BTreeMap::from([("scenes".to_string(), Value::from(4))]));

        let last = reporter.finish().await.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.details.get("chunks"), Some(&Value::from(2)));
        assert_eq!(last.details.get("scenes"), Some(&Value::from(4)));

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&(JobStatus::Pending, 0.0)));
        assert_eq!(seen.last(), Some(&(JobStatus::Completed, 1.0)));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));

        let stored = store.get_job(&job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }
}
