//! Narration assembly: chunk merge, silence trimming and music mixing.
//!
//! # Flow
//!
//! ```text
//! audio_chunk_0.mp3 ─┐
//! audio_chunk_1.mp3 ─┼─► merge (concat, -c copy) ─► audio_complete.mp3
//! audio_chunk_N.mp3 ─┘                                   │
//!                                    remove_silence (optional)
//!                                                        ▼
//!                                                audio_trimmed.mp3
//!                                                        │
//!   music segments ──► trim / volume / fades / delay ──► mix ─► audio_mixed.mp3
//!                                      (sidechain ducking, simple mix fallback)
//! ```
//!
//! Every output lands in the caller's work directory; encoder logs are written
//! next to them and removed on success.

mod merge;
mod mix;
mod silence;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

pub use mix::DuckingParams;
pub use silence::{compute_keep_segments, parse_silence_intervals, KeepSegment, SilenceInterval};

pub const MERGED_AUDIO_FILE: &str = "audio_complete.mp3";
pub const TRIMMED_AUDIO_FILE: &str = "audio_trimmed.mp3";
pub const MIXED_AUDIO_FILE: &str = "audio_mixed.mp3";

/// Default timeout for a single audio encoder pass.
const AUDIO_TIMEOUT_SECS: u64 = 600;

/// Audio stage operations backed by FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct AudioAssembler {
    limiter: Option<Arc<Semaphore>>,
}

impl AudioAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the encoder process limit with other media stages.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn runner(&self, operation: &str, work_dir: &Path) -> FfmpegRunner {
        let runner = FfmpegRunner::new(operation)
            .with_timeout(AUDIO_TIMEOUT_SECS)
            .with_log_file(work_dir.join(format!("ffmpeg_{}.log", operation)));
        match &self.limiter {
            Some(limiter) => runner.with_limiter(limiter.clone()),
            None => runner,
        }
    }

    /// Write `seconds` of silence to `output` as MP3.
    pub async fn silence_clip(&self, seconds: f64, output: &Path) -> MediaResult<()> {
        let work_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let cmd = FfmpegCommand::new(output)
            .silence_source(seconds.max(0.1))
            .audio_codec("libmp3lame")
            .audio_bitrate("128k");
        self.runner("silence_clip", work_dir).run(&cmd).await
    }
}
