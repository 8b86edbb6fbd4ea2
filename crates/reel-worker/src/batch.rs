//! Sequential script batches with pause, resume and cancel.
//!
//! Items run one at a time. Control flags are only looked at between items,
//! so a running job always finishes. A failed item never stops the batch.
//! A batch may carry a JSON config override that every item's job runs with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reel_models::{
    BatchItem, BatchItemStatus, BatchState, BatchStatus, JobId, JobSnapshot, PipelineConfig,
    ScriptInput, VideoResult,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::WorkerResult;
use crate::metrics;
use crate::status::{BatchSink, StatusSink};
use crate::store::BatchStore;

/// Runs one script as one job.
#[async_trait]
pub trait ScriptJobRunner: Send + Sync {
    /// Config a batch override is merged into.
    fn base_config(&self) -> &PipelineConfig;

    /// Run with `config`; `observer` receives every snapshot of the job.
    async fn run_script(
        &self,
        job_id: &JobId,
        text: &str,
        config: &PipelineConfig,
        observer: Arc<dyn StatusSink>,
    ) -> WorkerResult<VideoResult>;
}

/// Pause and cancel flags shared with whoever drives the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Where batch snapshots go after every change.
#[derive(Clone)]
struct Publisher {
    store: Arc<dyn BatchStore>,
    sinks: Vec<Arc<dyn BatchSink>>,
}

impl Publisher {
    async fn publish(&self, status: BatchStatus) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_batch_update(&status).await {
                warn!(batch_id = %status.batch_id, "Batch sink failed: {}", e);
            }
        }
        self.store.put_batch(status).await;
    }
}

/// Copies the running job's progress into its batch item.
struct ItemMirror {
    batch: Arc<Mutex<BatchStatus>>,
    index: usize,
    publisher: Publisher,
}

#[async_trait]
impl StatusSink for ItemMirror {
    async fn on_job_update(&self, snapshot: &JobSnapshot) -> WorkerResult<()> {
        let status = {
            let mut batch = self.batch.lock().await;
            let Some(item) = batch.items.get_mut(self.index) else {
                return Ok(());
            };
            if item.status != BatchItemStatus::Processing {
                return Ok(());
            }
            item.progress = snapshot.progress;
            item.current_step = snapshot.current_step.clone();
            batch.refresh_progress();
            batch.clone()
        };
        self.publisher.publish(status).await;
        Ok(())
    }
}

/// Drives a [`ScriptJobRunner`] over a list of scripts.
pub struct BatchRunner {
    runner: Arc<dyn ScriptJobRunner>,
    publisher: Publisher,
    poll_interval: Duration,
}

impl BatchRunner {
    pub fn new(runner: Arc<dyn ScriptJobRunner>, store: Arc<dyn BatchStore>) -> Self {
        Self {
            runner,
            publisher: Publisher {
                store,
                sinks: Vec::new(),
            },
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn BatchSink>) -> Self {
        self.publisher.sinks.push(sink);
        self
    }

    /// How often a paused batch re-checks its flags.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run every script in order and return the final batch state.
    pub async fn run(
        &self,
        batch_id: &str,
        name: &str,
        scripts: Vec<ScriptInput>,
        control: BatchControl,
    ) -> BatchStatus {
        self.run_with_overrides(batch_id, name, scripts, None, control).await
    }

    /// Like [`run`](Self::run), with `overrides` merged into the runner's
    /// config for every item (see [`PipelineConfig::with_overrides`]).
    ///
    /// An override that does not produce a valid config fails each item
    /// instead of starting its job.
    pub async fn run_with_overrides(
        &self,
        batch_id: &str,
        name: &str,
        scripts: Vec<ScriptInput>,
        overrides: Option<&Value>,
        control: BatchControl,
    ) -> BatchStatus {
        let items = scripts
            .into_iter()
            .enumerate()
            .map(|(i, script)| {
                let title = script.title.unwrap_or_else(|| format!("Script {}", i + 1));
                BatchItem::new(format!("{}_{}", batch_id, i + 1), title, script.text)
            })
            .collect::<Vec<_>>();
        let total = items.len();
        info!(batch_id, name, items = total, "Starting batch");

        let batch = Arc::new(Mutex::new(BatchStatus::new(batch_id, name, items)));
        self.update(&batch, |b| {
            b.status = BatchState::Processing;
            b.started_at = Some(Utc::now());
        })
        .await;

        for index in 0..total {
            if !self.wait_while_paused(&batch, &control).await {
                break;
            }
            self.run_item(&batch, index, overrides).await;
        }

        let cancelled = control.is_cancelled();
        let status = self
            .update(&batch, |b| {
                b.current_item_index = None;
                b.completed_at = Some(Utc::now());
                if cancelled {
                    for item in b.items.iter_mut().filter(|i| i.status == BatchItemStatus::Pending) {
                        item.status = BatchItemStatus::Skipped;
                    }
                }
                b.refresh_progress();
                let all_failed = b.total_items > 0 && b.failed_items == b.total_items;
                if cancelled {
                    b.status = BatchState::Cancelled;
                } else if all_failed {
                    b.status = BatchState::Failed;
                    b.error = Some("all items failed".to_string());
                } else {
                    b.status = BatchState::Completed;
                }
            })
            .await;

        info!(
            batch_id,
            status = status.status.as_str(),
            completed = status.completed_items,
            failed = status.failed_items,
            "Batch finished"
        );
        status
    }

    /// Block at an item boundary while paused. Returns `false` once cancelled.
    async fn wait_while_paused(&self, batch: &Arc<Mutex<BatchStatus>>, control: &BatchControl) -> bool {
        loop {
            if control.is_cancelled() {
                return false;
            }
            if !control.is_paused() {
                return true;
            }
            // Publish on every poll so observers see the batch is alive.
            self.update(batch, |b| b.status = BatchState::Paused).await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// The runner's config with the batch override applied.
    fn item_config(&self, overrides: Option<&Value>) -> Result<PipelineConfig, String> {
        let base = self.runner.base_config();
        match overrides {
            Some(overrides) => base
                .with_overrides(overrides)
                .map_err(|e| format!("invalid config override: {}", e)),
            None => Ok(base.clone()),
        }
    }

    async fn run_item(&self, batch: &Arc<Mutex<BatchStatus>>, index: usize, overrides: Option<&Value>) {
        let job_id = JobId::new();
        let mut text = String::new();
        let mut item_id = String::new();
        self.update(batch, |b| {
            b.status = BatchState::Processing;
            b.current_item_index = Some(index);
            let item = &mut b.items[index];
            item.start(job_id.clone());
            text = item.text.clone();
            item_id = item.id.clone();
        })
        .await;

        let outcome = if text.trim().is_empty() {
            Err("empty script text".to_string())
        } else {
            match self.item_config(overrides) {
                Ok(config) => {
                    let mirror = Arc::new(ItemMirror {
                        batch: batch.clone(),
                        index,
                        publisher: self.publisher.clone(),
                    });
                    self.runner
                        .run_script(&job_id, &text, &config, mirror)
                        .await
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(e),
            }
        };

        let item_status = match &outcome {
            Ok(video) => {
                info!(item = %item_id, job_id = %job_id, path = %video.path.display(), "Batch item completed");
                BatchItemStatus::Completed
            }
            Err(e) => {
                warn!(item = %item_id, job_id = %job_id, "Batch item failed: {}", e);
                BatchItemStatus::Failed
            }
        };
        metrics::record_batch_item(item_status.as_str());

        self.update(batch, |b| {
            let item = &mut b.items[index];
            match outcome {
                Ok(video) => item.complete(video.path),
                Err(e) => item.fail(e),
            }
        })
        .await;
    }

    /// Apply `f`, refresh counters and publish the new snapshot.
    async fn update<F>(&self, batch: &Arc<Mutex<BatchStatus>>, f: F) -> BatchStatus
    where
        F: FnOnce(&mut BatchStatus),
    {
        let status = {
            let mut guard = batch.lock().await;
            f(&mut guard);
            guard.refresh_progress();
            guard.clone()
        };
        self.publisher.publish(status.clone()).await;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::store::MemoryBatchStore;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    /// Completes every script unless it contains "fail"; can pause or cancel
    /// the batch while running the script that contains "stop".
    struct FakeRunner {
        control: BatchControl,
        on_stop: fn(&BatchControl),
        config: PipelineConfig,
        seen: StdMutex<Vec<String>>,
        configs: StdMutex<Vec<PipelineConfig>>,
    }

    impl FakeRunner {
        fn new(control: &BatchControl, on_stop: fn(&BatchControl)) -> Self {
            Self {
                control: control.clone(),
                on_stop,
                config: PipelineConfig::default(),
                seen: StdMutex::new(Vec::new()),
                configs: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScriptJobRunner for FakeRunner {
        fn base_config(&self) -> &PipelineConfig {
            &self.config
        }

        async fn run_script(
            &self,
            job_id: &JobId,
            text: &str,
            config: &PipelineConfig,
            observer: Arc<dyn StatusSink>,
        ) -> WorkerResult<VideoResult> {
            self.seen.lock().unwrap().push(text.to_string());
            self.configs.lock().unwrap().push(config.clone());

            let mut snapshot = JobSnapshot::new(job_id.clone());
            snapshot.progress = 0.5;
            snapshot.current_step = "Halfway".into();
            observer.on_job_update(&snapshot).await?;

            if text.contains("stop") {
                (self.on_stop)(&self.control);
            }
            if text.contains("fail") {
                return Err(WorkerError::job_failed("renderer exploded"));
            }
            Ok(VideoResult {
                path: PathBuf::from(format!("/out/{}.mp4", job_id)),
                duration_seconds: 10.0,
                scenes_count: 2,
                resolution: "1920x1080".into(),
                file_size_bytes: 1_024,
            })
        }
    }

    fn scripts(texts: &[&str]) -> Vec<ScriptInput> {
        texts.iter().map(|t| ScriptInput::new(*t)).collect()
    }

    fn runner(fake: Arc<FakeRunner>, store: Arc<MemoryBatchStore>) -> BatchRunner {
        BatchRunner::new(fake, store).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_failed_item_does_not_stop_batch() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));
        let store = Arc::new(MemoryBatchStore::new(10));

        let status = runner(fake, store.clone())
            .run("b1", "mixed", scripts(&["one", "fail two", "   ", "four"]), control)
            .await;

        assert_eq!(status.status, BatchState::Completed);
        assert_eq!(status.completed_items, 2);
        assert_eq!(status.failed_items, 2);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.items[0].id, "b1_1");
        assert_eq!(status.items[0].title, "Script 1");
        assert!(status.items[0].video_path.is_some());
        assert_eq!(status.items[1].error.as_deref(), Some("Job failed: renderer exploded"));
        assert_eq!(status.items[2].error.as_deref(), Some("empty script text"));
        assert_eq!(store.get_batch("b1").await.unwrap(), status);
    }

    #[tokio::test]
    async fn test_all_items_failed_fails_batch() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));
        let store = Arc::new(MemoryBatchStore::new(10));

        let status = runner(fake, store)
            .run("b2", "doomed", scripts(&["fail a", "fail b"]), control)
            .await;

        assert_eq!(status.status, BatchState::Failed);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_pause_holds_remaining_items() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, BatchControl::pause));
        let store = Arc::new(MemoryBatchStore::new(10));
        let batch_runner = runner(fake.clone(), store.clone());

        let texts = ["a", "b stop", "c", "d", "e"];
        let task_control = control.clone();
        let task = tokio::spawn(async move {
            batch_runner
                .run("b3", "paused", scripts(&texts), task_control)
                .await
        });

        let paused = loop {
            if let Some(status) = store.get_batch("b3").await {
                if status.status == BatchState::Paused {
                    break status;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        };

        assert_eq!(paused.items[0].status, BatchItemStatus::Completed);
        assert_eq!(paused.items[1].status, BatchItemStatus::Completed);
        for item in &paused.items[2..] {
            assert_eq!(item.status, BatchItemStatus::Pending);
        }
        assert_eq!(fake.seen.lock().unwrap().len(), 2);

        control.resume();
        let status = task.await.unwrap();

        assert_eq!(status.status, BatchState::Completed);
        assert_eq!(status.completed_items, 5);
        assert_eq!(fake.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_cancel_skips_remaining_items() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, BatchControl::cancel));
        let store = Arc::new(MemoryBatchStore::new(10));

        let status = runner(fake.clone(), store)
            .run("b4", "cancelled", scripts(&["a", "b stop", "c", "d", "e"]), control)
            .await;

        assert_eq!(status.status, BatchState::Cancelled);
        assert_eq!(status.items[1].status, BatchItemStatus::Completed);
        for item in &status.items[2..] {
            assert_eq!(item.status, BatchItemStatus::Skipped);
        }
        assert_eq!(fake.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let control = BatchControl::new();
        control.pause();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));
        let store = Arc::new(MemoryBatchStore::new(10));
        let batch_runner = runner(fake.clone(), store.clone());

        let task_control = control.clone();
        let task = tokio::spawn(async move {
            batch_runner.run("b5", "held", scripts(&["a", "b"]), task_control).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();

        let status = task.await.unwrap();
        assert_eq!(status.status, BatchState::Cancelled);
        assert!(status.items.iter().all(|i| i.status == BatchItemStatus::Skipped));
        assert!(fake.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_progress_is_mirrored() {
        struct Recorder(StdMutex<Vec<f64>>);

        #[async_trait]
        impl BatchSink for Recorder {
            async fn on_batch_update(&self, status: &BatchStatus) -> WorkerResult<()> {
                self.0.lock().unwrap().push(status.progress);
                Ok(())
            }
        }

        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        let status = runner(fake, Arc::new(MemoryBatchStore::new(10)))
            .with_sink(recorder.clone())
            .run("b6", "mirror", scripts(&["a", "b"]), control)
            .await;

        assert_eq!(status.status, BatchState::Completed);
        let progress = recorder.0.lock().unwrap().clone();
        // halfway through item 1 of 2, then halfway through item 2
        assert!(progress.contains(&0.25));
        assert!(progress.contains(&0.75));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_override_reaches_every_item_job() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));
        let overrides = serde_json::json!({
            "images": {"style": "watercolor, soft light"},
            "music": {"mode": "generated"}
        });

        let status = runner(fake.clone(), Arc::new(MemoryBatchStore::new(10)))
            .run_with_overrides("b7", "styled", scripts(&["a", "b"]), Some(&overrides), control)
            .await;

        assert_eq!(status.completed_items, 2);
        let configs = fake.configs.lock().unwrap();
        assert_eq!(configs.len(), 2);
        for config in configs.iter() {
            assert_eq!(config.images.style, "watercolor, soft light");
            assert_eq!(config.music.mode, reel_models::MusicMode::Generated);
            assert_eq!(config.images.model, fake.config.images.model);
        }
        // the runner's own config is unchanged
        assert_ne!(fake.config.images.style, "watercolor, soft light");
    }

    #[tokio::test]
    async fn test_without_override_items_get_base_config() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));

        runner(fake.clone(), Arc::new(MemoryBatchStore::new(10)))
            .run("b8", "plain", scripts(&["a"]), control)
            .await;

        let configs = fake.configs.lock().unwrap();
        assert_eq!(configs[0].images.style, fake.config.images.style);
    }

    #[tokio::test]
    async fn test_invalid_override_fails_items_without_running() {
        let control = BatchControl::new();
        let fake = Arc::new(FakeRunner::new(&control, |_| {}));
        let overrides = serde_json::json!({"composition": {"crf": 99}});

        let status = runner(fake.clone(), Arc::new(MemoryBatchStore::new(10)))
            .run_with_overrides("b9", "broken", scripts(&["a", "b"]), Some(&overrides), control)
            .await;

        assert_eq!(status.status, BatchState::Failed);
        assert_eq!(status.failed_items, 2);
        assert!(status.items[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("invalid config override"));
        assert!(fake.seen.lock().unwrap().is_empty());
    }
}
