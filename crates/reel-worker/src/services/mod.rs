//! Collaborators the orchestrator depends on.
//!
//! Remote services sit behind traits so the pipeline can run against fakes;
//! the local implementations (chunking, scene splitting, music selection,
//! music prompts) live next to them.

mod chunker;
mod music;
mod remote;
mod scenes;

pub use chunker::{estimate_duration, TextChunker, DEFAULT_MAX_CHARS};
pub use music::{generated_segment, music_prompt, LibraryMusicSelector, FALLBACK_MOOD};
pub use remote::{AssemblyAiTranscriber, ElevenLabsProvider, SunoProvider, WaveSpeedProvider};
pub use scenes::ParagraphSceneSplitter;

use std::path::Path;

use async_trait::async_trait;
use reel_models::{
    GeneratedMusicConfig, ImageConfig, MusicConfig, MusicSegment, PipelineConfig, SceneAnalysis,
    Transcription, VoiceConfig,
};

use crate::error::WorkerResult;

/// Phase label and 0..1 fraction reported while transcribing.
pub type TranscriptionProgress<'a> = &'a (dyn Fn(&str, f64) + Send + Sync);

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        on_progress: TranscriptionProgress<'_>,
    ) -> WorkerResult<Transcription>;
}

#[async_trait]
pub trait SceneAnalyzer: Send + Sync {
    /// Scenes covering `narration_ms` with contiguous timing.
    async fn analyze(
        &self,
        transcription: &Transcription,
        narration_ms: u64,
        config: &PipelineConfig,
    ) -> WorkerResult<SceneAnalysis>;
}

#[async_trait]
pub trait MusicSelector: Send + Sync {
    /// Music placement for the narration; empty when music is off.
    async fn select(
        &self,
        analysis: &SceneAnalysis,
        narration_ms: u64,
        config: &MusicConfig,
    ) -> WorkerResult<Vec<MusicSegment>>;
}

/// A connected speech synthesis client.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, output: &Path) -> WorkerResult<()>;
}

/// A connected image generation client.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, output: &Path) -> WorkerResult<()>;
}

/// A connected music generation client.
#[async_trait]
pub trait MusicGenerator: Send + Sync {
    /// Compose a track of about `duration_secs` and write it to `output`.
    async fn compose(&self, prompt: &str, duration_secs: f64, output: &Path) -> WorkerResult<()>;
}

/// Opens one speech client per generation stage.
///
/// The client (and its connection pool) is dropped when the stage returns.
/// Settings come from the job's config, so per-batch overrides reach the client.
pub trait SpeechProvider: Send + Sync {
    fn connect(&self, voice: &VoiceConfig) -> WorkerResult<Box<dyn SpeechSynthesizer>>;
}

/// Opens one image client per generation stage.
pub trait ImageProvider: Send + Sync {
    fn connect(&self, images: &ImageConfig) -> WorkerResult<Box<dyn ImageGenerator>>;
}

/// Opens a music client for a job that asks for generated music.
pub trait MusicProvider: Send + Sync {
    fn connect(&self, config: &GeneratedMusicConfig) -> WorkerResult<Box<dyn MusicGenerator>>;
}
