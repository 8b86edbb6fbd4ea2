//! Batched slideshow composition.
//!
//! Scenes are rendered in fixed-size batches so a single encoder process never
//! holds more than `batch_size` decoded images. Batches are joined afterwards
//! and the soundtrack is muxed onto the joined picture.
//!
//! ```text
//! scenes + images ─► plan_batches ─► batch_000.mp4 .. batch_NNN.mp4 (silent)
//!                                          │
//!                      reuse | xfade re-encode | concat copy
//!                                          ▼
//!                                   video_stitched.mp4 ─► mux(audio) ─► output
//! ```

mod filters;
mod plan;
mod stitch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reel_models::{CompositionConfig, GeneratedImage, Scene, VideoResult};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_output, remove_temp_file, MIN_OUTPUT_BYTES};
use crate::probe::get_duration;

pub use filters::{batch_graph, scene_chain, RenderEffects};
pub use plan::{
    build_clips, mood_color, plan_batches, render_timeout_secs, scene_durations, stitch_timeout_secs,
    SceneClip, SceneSource, Zoom,
};
pub use stitch::{stitch_plan, StitchPlan};

const STITCHED_VIDEO_FILE: &str = "video_stitched.mp4";
const STITCH_LIST_FILE: &str = "batches.txt";

/// Renders scenes and narration into the final video.
#[derive(Debug, Clone)]
pub struct CompositionEngine {
    config: CompositionConfig,
    limiter: Option<Arc<Semaphore>>,
}

impl CompositionEngine {
    pub fn new(config: CompositionConfig) -> Self {
        Self {
            config,
            limiter: None,
        }
    }

    /// Share the encoder process limit with other media stages.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    fn runner(&self, operation: &str, work_dir: &Path, timeout_secs: u64) -> FfmpegRunner {
        let runner = FfmpegRunner::new(operation)
            .with_timeout(timeout_secs)
            .with_log_file(work_dir.join(format!("ffmpeg_{}.log", operation)));
        match &self.limiter {
            Some(limiter) => runner.with_limiter(limiter.clone()),
            None => runner,
        }
    }

    /// Compose `scenes` over `audio` into `output`.
    pub async fn compose(
        &self,
        scenes: &[Scene],
        images: &[GeneratedImage],
        audio: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> MediaResult<VideoResult> {
        self.compose_with_progress(scenes, images, audio, work_dir, output, |_, _| {})
            .await
    }

    /// Like [`compose`](Self::compose), calling `on_batch(done, total)` after
    /// each rendered batch.
    pub async fn compose_with_progress<F>(
        &self,
        scenes: &[Scene],
        images: &[GeneratedImage],
        audio: &Path,
        work_dir: &Path,
        output: &Path,
        on_batch: F,
    ) -> MediaResult<VideoResult>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        if scenes.is_empty() {
            return Err(MediaError::empty_input("no scenes to compose"));
        }
        if !audio.exists() {
            return Err(MediaError::FileNotFound(audio.to_path_buf()));
        }
        tokio::fs::create_dir_all(work_dir).await?;

        let clips = build_clips(scenes, images, &self.config);
        let effects = RenderEffects::for_scene_count(clips.len(), &self.config);
        let ranges = plan_batches(clips.len(), self.config.batching.batch_size);
        let color_fills = clips
            .iter()
            .filter(|c| matches!(c.source, SceneSource::Color(_)))
            .count();

        info!(
            scenes = clips.len(),
            batches = ranges.len(),
            color_fills = color_fills,
            ken_burns = effects.ken_burns,
            transitions = effects.transitions,
            "Composing video"
        );

        let mut batch_files = Vec::with_capacity(ranges.len());
        let mut batch_durations = Vec::with_capacity(ranges.len());
        for (n, range) in ranges.iter().enumerate() {
            let batch = &clips[range.clone()];
            let path = work_dir.join(format!("batch_{:03}.mp4", n));
            let result = self.render_batch(batch, effects, work_dir, &path).await;
            if let Err(e) = result {
                remove_files(&batch_files).await;
                return Err(e);
            }
            batch_durations.push(batch.iter().map(|c| c.duration).sum::<f64>());
            batch_files.push(path);
            on_batch(n + 1, ranges.len());
        }

        let stitched = match self.stitch(&batch_files, &batch_durations, work_dir).await {
            Ok(path) => path,
            Err(e) => {
                remove_files(&batch_files).await;
                return Err(e);
            }
        };

        let cmd = stitch::mux_command(&stitched, audio, &self.config.audio, output);
        let muxed = self
            .runner("mux", work_dir, stitch_timeout_secs(batch_files.len()))
            .run(&cmd)
            .await;

        remove_files(&batch_files).await;
        if !batch_files.contains(&stitched) {
            remove_files(std::slice::from_ref(&stitched)).await;
        }
        muxed?;

        let file_size_bytes = ensure_output(output, MIN_OUTPUT_BYTES).await?;
        let planned: f64 = batch_durations.iter().sum();
        let duration_seconds = match get_duration(output).await {
            Ok(d) if d > 0.0 => d,
            Ok(_) => planned,
            Err(e) => {
                debug!("Probe of {} failed, using planned duration: {}", output.display(), e);
                planned
            }
        };

        info!(
            duration = duration_seconds,
            size = file_size_bytes,
            "Video composed at {}",
            output.display()
        );

        Ok(VideoResult {
            path: output.to_path_buf(),
            duration_seconds,
            scenes_count: clips.len(),
            resolution: self.config.resolution(),
            file_size_bytes,
        })
    }

    async fn render_batch(
        &self,
        clips: &[SceneClip],
        effects: RenderEffects,
        work_dir: &Path,
        output: &Path,
    ) -> MediaResult<()> {
        let cmd = filters::batch_command(clips, &self.config, effects, output);
        let timeout = render_timeout_secs(clips.len(), &self.config);
        debug!(scenes = clips.len(), timeout_secs = timeout, "Rendering {}", output.display());

        self.runner("render_batch", work_dir, timeout).run(&cmd).await?;
        ensure_output(output, MIN_OUTPUT_BYTES).await?;
        Ok(())
    }

    async fn stitch(&self, batches: &[PathBuf], durations: &[f64], work_dir: &Path) -> MediaResult<PathBuf> {
        let batching = &self.config.batching;
        let timeout = stitch_timeout_secs(batches.len());
        let output = work_dir.join(STITCHED_VIDEO_FILE);

        match stitch_plan(batches, batching.max_batches_for_crossfade, batching.batch_crossfade_seconds) {
            StitchPlan::Reuse(path) => return Ok(path),
            StitchPlan::Crossfade => {
                let fade = batching
                    .batch_crossfade_seconds
                    .min(durations.iter().cloned().fold(f64::INFINITY, f64::min) / 2.0);
                let cmd = stitch::crossfade_command(
                    batches,
                    durations,
                    fade,
                    &self.config.preset,
                    self.config.crf,
                    self.config.threads,
                    &output,
                );
                info!(batches = batches.len(), "Joining batches with cross-fades");
                self.runner("stitch_crossfade", work_dir, timeout).run(&cmd).await?;
            }
            StitchPlan::Concat => {
                let list_path = work_dir.join(STITCH_LIST_FILE);
                tokio::fs::write(&list_path, stitch::concat_list(batches)).await?;
                info!(batches = batches.len(), "Joining batches with stream copy");
                let result = self
                    .runner("stitch_concat", work_dir, timeout)
                    .run(&stitch::concat_command(&list_path, &output))
                    .await;
                remove_temp_file(&list_path).await;
                result?;
            }
        }

        ensure_output(&output, MIN_OUTPUT_BYTES).await?;
        Ok(output)
    }
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
