//! Shared data models for the scriptreel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their status snapshots
//! - Script batches and batch items
//! - Scenes, transcriptions and generated artifacts
//! - Pipeline configuration with documented defaults

pub mod artifact;
pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod scene;
pub mod transcript;

// Re-export common types
pub use artifact::{
    AudioChunk, GeneratedImage, Indexed, MergedAudio, MixedAudio, MusicSegment, SilenceRemoval,
    TextChunk, VideoResult,
};
pub use batch::{BatchItem, BatchItemStatus, BatchState, BatchStatus, ScriptInput};
pub use config::{
    AudioCodec, AudioOutputConfig, BatchingConfig, BlendMode, CompositionConfig, EffectToggle,
    GeneratedMusicConfig, GenerationConfig, ImageConfig, KenBurnsConfig, MusicConfig, MusicMode, OverlayConfig,
    PipelineConfig, RetryPolicyConfig, SceneConfig, SceneDurationConfig, SceneDurationMode,
    SilenceConfig, SubtitleColor, SubtitleConfig, SubtitlePosition, TransitionConfig,
    TransitionKind, VoiceConfig, ZoomDirection,
};
pub use error::{ModelError, ModelResult};
pub use job::{JobId, JobSnapshot, JobStatus};
pub use scene::{finalize_timeline, MusicCue, Scene, SceneAnalysis};
pub use transcript::{Paragraph, TranscriptSegment, Transcription, Word};
