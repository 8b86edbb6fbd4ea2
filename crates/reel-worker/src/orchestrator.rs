//! Script-to-video pipeline.
//!
//! ```text
//! text ─► chunks ─► narration ─► merge (+ silence trim) ─► transcript ─► scenes
//!                                                                          │
//!          video ◄─ post-process ◄─ compose ◄─ mix ◄─ music ◄─ images ◄────┘
//! ```
//!
//! Every intermediate lives in `<temp_dir>/<job_id>`, which is removed when the
//! job ends either way. Status goes through one [`StatusReporter`] per job.
//! Each run reads its own [`PipelineConfig`], so a batch can override settings
//! without touching the orchestrator's defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reel_media::{ensure_output, move_file, AudioAssembler, CompositionEngine, PostProcessor};
use reel_models::{
    finalize_timeline, AudioChunk, GeneratedImage, JobId, JobStatus, MusicMode, MusicSegment,
    PipelineConfig, SceneAnalysis, Transcription, VideoResult,
};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::batch::ScriptJobRunner;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::generation::GenerationStageExecutor;
use crate::logging::JobLogger;
use crate::metrics;
use crate::services::{
    generated_segment, music_prompt, AssemblyAiTranscriber, ElevenLabsProvider, ImageProvider,
    LibraryMusicSelector, MusicProvider, MusicSelector, ParagraphSceneSplitter, SceneAnalyzer,
    SpeechProvider, SunoProvider, TextChunker, Transcriber, WaveSpeedProvider,
};
use crate::stages::{AudioStage, ImageStage};
use crate::status::{StatusHandle, StatusReporter, StatusSink};
use crate::store::JobStore;

/// File name of a generated background track inside the job directory.
pub const GENERATED_MUSIC_FILE: &str = "music_generated.mp3";

/// The collaborators a pipeline run talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub speech: Arc<dyn SpeechProvider>,
    pub images: Arc<dyn ImageProvider>,
    pub transcriber: Arc<dyn Transcriber>,
    pub scenes: Arc<dyn SceneAnalyzer>,
    pub music: Arc<dyn MusicSelector>,
    pub music_generation: Arc<dyn MusicProvider>,
}

impl PipelineServices {
    /// Hosted services plus the local scene splitter and music library.
    pub fn from_worker_config(worker: &WorkerConfig) -> Self {
        Self {
            speech: Arc::new(ElevenLabsProvider::new(worker.elevenlabs_api_key.clone())),
            images: Arc::new(WaveSpeedProvider::new(worker.wavespeed_api_key.clone())),
            transcriber: Arc::new(AssemblyAiTranscriber::new(worker.assemblyai_api_key.clone())),
            scenes: Arc::new(ParagraphSceneSplitter::new()),
            music: Arc::new(LibraryMusicSelector::new(worker.music_library.clone())),
            music_generation: Arc::new(SunoProvider::new(worker.suno_api_key.clone())),
        }
    }
}

/// Narration after merging and optional silence trimming.
struct Narration {
    path: PathBuf,
    duration_ms: u64,
    chunks: usize,
}

/// One job's config, the stages built from it and where it reports.
struct RunContext<'a> {
    config: &'a PipelineConfig,
    executor: GenerationStageExecutor,
    chunker: TextChunker,
    composer: CompositionEngine,
    work_dir: &'a Path,
    status: &'a StatusHandle,
    logger: &'a JobLogger,
}

/// Runs one script through every stage.
pub struct PipelineOrchestrator {
    config: Arc<PipelineConfig>,
    temp_dir: PathBuf,
    output_dir: PathBuf,
    max_log_lines: usize,
    services: PipelineServices,
    limiter: Arc<Semaphore>,
    assembler: AudioAssembler,
    post: PostProcessor,
    store: Arc<dyn JobStore>,
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        worker: &WorkerConfig,
        services: PipelineServices,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(worker.max_ffmpeg_processes.max(1)));
        Self {
            assembler: AudioAssembler::new().with_limiter(limiter.clone()),
            post: PostProcessor::new().with_limiter(limiter.clone()),
            limiter,
            config: Arc::new(config),
            temp_dir: worker.temp_dir.clone(),
            output_dir: worker.output_dir.clone(),
            max_log_lines: worker.max_log_lines,
            services,
            store,
            sinks: Vec::new(),
        }
    }

    /// Push every snapshot of every job to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Config used when a run does not bring its own.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Turn `script` into a video in the output directory.
    pub async fn run(&self, job_id: &JobId, script: &str) -> WorkerResult<VideoResult> {
        let config = self.config.clone();
        self.run_observed(job_id, script, &config, None).await
    }

    /// Like [`run`](Self::run) with `config` for this job only, also pushing
    /// this job's snapshots to `observer`.
    pub async fn run_observed(
        &self,
        job_id: &JobId,
        script: &str,
        config: &PipelineConfig,
        observer: Option<Arc<dyn StatusSink>>,
    ) -> WorkerResult<VideoResult> {
        let logger = JobLogger::new(job_id, "script_to_video");
        let started = Instant::now();

        let mut sinks = self.sinks.clone();
        sinks.extend(observer);
        let reporter = StatusReporter::spawn(job_id.clone(), self.max_log_lines, self.store.clone(), sinks);
        let status = reporter.handle();
        let work_dir = self.temp_dir.join(job_id.as_str());
        let ctx = self.context(config, &work_dir, &status, &logger);

        logger.log_start(&format!("{} characters", script.chars().count()));
        let result = async {
            tokio::fs::create_dir_all(&work_dir).await?;
            self.execute(&ctx, job_id, script).await
        }
        .instrument(logger.create_span())
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(video) => {
                let details = BTreeMap::from([
                    ("video_path".to_string(), Value::from(video.path.display().to_string())),
                    ("duration".to_string(), Value::from(video.duration_seconds)),
                    ("scenes".to_string(), Value::from(video.scenes_count)),
                    ("file_size".to_string(), Value::from(video.file_size_bytes)),
                ]);
                status.complete(details);
                metrics::record_job("completed", elapsed);
                logger.log_completion(&format!("{} in {:.1}s", video.path.display(), elapsed));
            }
            Err(e) => {
                status.fail(e.to_string());
                metrics::record_job("failed", elapsed);
                logger.log_error(&e.to_string());
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                logger.log_warning(&format!("Failed to remove {}: {}", work_dir.display(), e));
            }
        }
        reporter.finish().await;

        result
    }

    fn context<'a>(
        &self,
        config: &'a PipelineConfig,
        work_dir: &'a Path,
        status: &'a StatusHandle,
        logger: &'a JobLogger,
    ) -> RunContext<'a> {
        RunContext {
            config,
            executor: GenerationStageExecutor::from_config(&config.generation),
            chunker: TextChunker::new(config.voice.max_chunk_chars),
            composer: CompositionEngine::new(config.composition.clone()).with_limiter(self.limiter.clone()),
            work_dir,
            status,
            logger,
        }
    }

    async fn execute(&self, ctx: &RunContext<'_>, job_id: &JobId, script: &str) -> WorkerResult<VideoResult> {
        let narration = self.narrate(ctx, script).await?;
        let transcription = self.transcribe(ctx, &narration).await?;
        let analysis = self.analyze(ctx, &transcription, &narration).await?;
        let music = self.select_music(ctx, &analysis, &narration).await;
        let images = self.render_images(ctx, &analysis).await?;

        ctx.logger.log_stage(JobStatus::MixingAudio, 0.80);
        ctx.status.stage(JobStatus::MixingAudio, 0.80, "Mixing narration and music");
        let mixed = self
            .assembler
            .mix(&narration.path, narration.duration_ms, &music, &ctx.config.music, ctx.work_dir)
            .await?;
        ctx.status.detail("has_music", mixed.has_music);

        let video = self.compose(ctx, &analysis, &images, &mixed.path, &transcription).await?;
        self.publish(job_id, video).await
    }

    /// Chunk the script, synthesize every chunk and merge the narration.
    async fn narrate(&self, ctx: &RunContext<'_>, script: &str) -> WorkerResult<Narration> {
        let status = ctx.status;
        ctx.logger.log_stage(JobStatus::ProcessingText, 0.05);
        status.stage(JobStatus::ProcessingText, 0.05, "Splitting script into chunks");
        let chunks = ctx.chunker.chunk(script);
        if chunks.is_empty() {
            return Err(WorkerError::invalid_input("empty script text"));
        }
        status.detail("chunks", chunks.len());
        status.detail("characters", script.chars().count());

        ctx.logger.log_stage(JobStatus::GeneratingAudio, 0.10);
        status.stage(
            JobStatus::GeneratingAudio,
            0.10,
            format!("Generating narration for {} chunks", chunks.len()),
        );
        let audio: Vec<AudioChunk> = {
            let synthesizer = self.services.speech.connect(&ctx.config.voice)?;
            let stage = AudioStage::new(synthesizer, self.assembler.clone(), ctx.work_dir);
            ctx.executor
                .generate_all(
                    &stage,
                    &chunks,
                    ctx.config.generation.audio_concurrency,
                    |done, total| {
                        status.progress(
                            0.10 + done as f64 / total as f64 * 0.15,
                            format!("Narration {}/{}", done, total),
                        )
                    },
                )
                .await
        };
        let placeholders = audio.iter().filter(|a| a.placeholder).count();
        if placeholders > 0 {
            status.log(format!("{} narration chunks replaced by silence", placeholders));
        }

        ctx.logger.log_stage(JobStatus::MergingAudio, 0.25);
        status.stage(JobStatus::MergingAudio, 0.25, "Merging narration");
        let merged = self.assembler.merge(&audio, ctx.work_dir).await?;
        let mut narration = Narration {
            path: merged.path,
            duration_ms: merged.duration_ms,
            chunks: merged.chunk_count,
        };

        if ctx.config.silence.enabled {
            status.progress(0.25, "Removing silences");
            let trimmed = self
                .assembler
                .remove_silence(&narration.path, narration.duration_ms, &ctx.config.silence, ctx.work_dir)
                .await?;
            if trimmed.silences_removed > 0 {
                status.log(format!(
                    "Removed {} silences ({:.1}s)",
                    trimmed.silences_removed,
                    trimmed.time_saved_ms as f64 / 1000.0
                ));
            }
            narration.path = trimmed.path;
            narration.duration_ms = trimmed.new_duration_ms;
        }

        status.detail("narration_ms", narration.duration_ms);
        ctx.logger.log_progress(&format!(
            "narration {:.1}s from {} chunks",
            narration.duration_ms as f64 / 1000.0,
            narration.chunks
        ));
        Ok(narration)
    }

    async fn transcribe(&self, ctx: &RunContext<'_>, narration: &Narration) -> WorkerResult<Transcription> {
        let status = ctx.status;
        ctx.logger.log_stage(JobStatus::Transcribing, 0.30);
        status.stage(JobStatus::Transcribing, 0.30, "Transcribing narration");
        let on_progress = |label: &str, fraction: f64| {
            status.progress(
                0.30 + fraction.clamp(0.0, 1.0) * 0.10,
                format!("Transcribing ({})", label),
            )
        };
        let transcription = self
            .services
            .transcriber
            .transcribe(&narration.path, &ctx.config.language, &on_progress)
            .await?;
        status.detail("words", transcription.words.len());
        Ok(transcription)
    }

    async fn analyze(
        &self,
        ctx: &RunContext<'_>,
        transcription: &Transcription,
        narration: &Narration,
    ) -> WorkerResult<SceneAnalysis> {
        ctx.logger.log_stage(JobStatus::AnalyzingScenes, 0.40);
        ctx.status.stage(JobStatus::AnalyzingScenes, 0.40, "Analyzing scenes");
        let mut analysis = self
            .services
            .scenes
            .analyze(transcription, narration.duration_ms, ctx.config)
            .await?;
        finalize_timeline(&mut analysis.scenes, narration.duration_ms);
        if analysis.scenes.is_empty() {
            return Err(WorkerError::stage_failed("scenes", "no scenes produced"));
        }
        ctx.status.detail("scenes", analysis.scenes.len());
        Ok(analysis)
    }

    /// Music placement; problems only cost the music.
    async fn select_music(
        &self,
        ctx: &RunContext<'_>,
        analysis: &SceneAnalysis,
        narration: &Narration,
    ) -> Vec<MusicSegment> {
        ctx.logger.log_stage(JobStatus::SelectingMusic, 0.45);
        let music = &ctx.config.music;
        let (message, result) = match music.mode {
            MusicMode::Generated => (
                "Generating background music",
                self.generate_music(ctx.config, analysis, narration.duration_ms, ctx.work_dir)
                    .await,
            ),
            MusicMode::Library | MusicMode::None => (
                "Selecting background music",
                self.services
                    .music
                    .select(analysis, narration.duration_ms, music)
                    .await,
            ),
        };
        ctx.status.stage(JobStatus::SelectingMusic, 0.45, message);

        match result {
            Ok(segments) => {
                ctx.status.detail("music_segments", segments.len());
                segments
            }
            Err(e) => {
                ctx.logger
                    .log_warning(&format!("Background music failed, continuing without: {}", e));
                ctx.status.log("Continuing without background music");
                Vec::new()
            }
        }
    }

    /// One track composed for this narration, laid under all of it.
    async fn generate_music(
        &self,
        config: &PipelineConfig,
        analysis: &SceneAnalysis,
        narration_ms: u64,
        work_dir: &Path,
    ) -> WorkerResult<Vec<MusicSegment>> {
        let settings = &config.music.generated;
        let prompt = music_prompt(analysis, settings);
        let output = work_dir.join(GENERATED_MUSIC_FILE);

        let generator = self.services.music_generation.connect(settings)?;
        generator
            .compose(&prompt, narration_ms as f64 / 1000.0, &output)
            .await?;
        ensure_output(&output, 1).await?;

        Ok(vec![generated_segment(output, analysis, narration_ms, &config.music)])
    }

    async fn render_images(&self, ctx: &RunContext<'_>, analysis: &SceneAnalysis) -> WorkerResult<Vec<GeneratedImage>> {
        let status = ctx.status;
        let total = analysis.scenes.len();
        ctx.logger.log_stage(JobStatus::GeneratingImages, 0.50);
        status.stage(
            JobStatus::GeneratingImages,
            0.50,
            format!("Generating {} images", total),
        );
        let images = {
            let stage = ImageStage::new(self.services.images.connect(&ctx.config.images)?, ctx.work_dir);
            ctx.executor
                .generate_all(
                    &stage,
                    &analysis.scenes,
                    ctx.config.generation.image_concurrency,
                    |done, total| {
                        status.progress(
                            0.50 + done as f64 / total as f64 * 0.30,
                            format!("Image {}/{}", done, total),
                        )
                    },
                )
                .await
        };
        let placeholders = images.iter().filter(|i| i.placeholder).count();
        if placeholders > 0 {
            status.log(format!("{} scenes will use a color fill", placeholders));
        }
        status.detail("placeholder_images", placeholders);
        Ok(images)
    }

    async fn compose(
        &self,
        ctx: &RunContext<'_>,
        analysis: &SceneAnalysis,
        images: &[GeneratedImage],
        audio: &Path,
        transcription: &Transcription,
    ) -> WorkerResult<VideoResult> {
        let status = ctx.status;
        let config = ctx.config;
        let work_dir = ctx.work_dir;
        ctx.logger.log_stage(JobStatus::ComposingVideo, 0.85);
        status.stage(JobStatus::ComposingVideo, 0.85, "Composing video");
        let composed = work_dir.join("composed.mp4");
        let mut video = ctx
            .composer
            .compose_with_progress(&analysis.scenes, images, audio, work_dir, &composed, |done, total| {
                status.progress(
                    0.85 + done as f64 / total.max(1) as f64 * 0.07,
                    format!("Rendered batch {}/{}", done, total),
                )
            })
            .await?;

        let fallback_size = (config.composition.width, config.composition.height);

        if config.overlay.enabled {
            status.progress(0.92, "Applying overlay effect");
            match self
                .post
                .apply_overlay(&video.path, &config.overlay, fallback_size, work_dir)
                .await
            {
                Ok(result) => {
                    video.path = result.path;
                    video.duration_seconds = result.duration_seconds;
                    video.file_size_bytes = result.file_size_bytes;
                }
                Err(e) => ctx.logger.log_warning(&format!("Overlay skipped: {}", e)),
            }
        }

        if config.subtitles.enabled {
            status.progress(0.94, "Burning subtitles");
            match self
                .post
                .burn_subtitles(&video.path, transcription, &config.subtitles, fallback_size, work_dir)
                .await
            {
                Ok(result) => {
                    video.path = result.path;
                    video.duration_seconds = result.duration_seconds;
                    video.file_size_bytes = result.file_size_bytes;
                }
                Err(e) => ctx.logger.log_warning(&format!("Subtitles skipped: {}", e)),
            }
        }

        status.progress(0.95, "Video composed");
        Ok(video)
    }

    /// Move the finished video into the output directory.
    async fn publish(&self, job_id: &JobId, mut video: VideoResult) -> WorkerResult<VideoResult> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let target = self.output_dir.join(output_file_name(job_id));
        move_file(&video.path, &target).await?;
        video.file_size_bytes = tokio::fs::metadata(&target).await?.len();
        video.path = target;
        Ok(video)
    }
}

/// `<YYYYmmdd_HHMMSS>_<job_id>.mp4`
pub fn output_file_name(job_id: &JobId) -> String {
    format!("{}_{}.mp4", Utc::now().format("%Y%m%d_%H%M%S"), job_id)
}

#[async_trait]
impl ScriptJobRunner for PipelineOrchestrator {
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
        self.run_observed(job_id, text, config, Some(observer)).await
    }
}
