#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for narrated slideshow rendering.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with log capture and a shared process limit
//! - Media probing through FFprobe
//! - Narration assembly (chunk merge, silence trimming, music mixing with ducking)
//! - Batched scene composition with Ken Burns, transitions and loudness-normalized muxing
//! - Post-processing passes (effect overlay, burned subtitles)

pub mod audio;
pub mod command;
pub mod compose;
pub mod error;
pub mod fs_utils;
pub mod postprocess;
pub mod probe;

pub use audio::AudioAssembler;
pub use command::{FfmpegCommand, FfmpegRunner};
pub use compose::CompositionEngine;
pub use error::{MediaError, MediaResult};
pub use fs_utils::{ensure_output, move_file, remove_temp_file, replace_intermediate, MIN_OUTPUT_BYTES};
pub use postprocess::{PostProcessed, PostProcessor};
pub use probe::{audio_duration_ms, get_duration, probe_media, MediaInfo};
