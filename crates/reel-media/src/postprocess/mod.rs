//! Optional passes over a composed video: effect overlay and burned subtitles.
//!
//! Each pass writes a new file in the work directory and deletes its input
//! only when the new file is on disk and the input is itself an intermediate
//! of the same work directory.

mod overlay;
mod subtitles;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::command::FfmpegRunner;
use crate::fs_utils::replace_intermediate;
use crate::probe::probe_media;

pub use overlay::{overlay_graph, OVERLAY_VIDEO_FILE};
pub use subtitles::{build_cues, format_ass_time, format_srt_time, render_ass, render_srt, Cue, SUBTITLED_VIDEO_FILE};

/// Timeout for a single post-processing pass.
const POSTPROCESS_TIMEOUT_SECS: u64 = 1800;

/// Output of a post-processing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessed {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub file_size_bytes: u64,
}

/// Runs the post-processing passes.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    limiter: Option<Arc<Semaphore>>,
}

impl PostProcessor {
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
            .with_timeout(POSTPROCESS_TIMEOUT_SECS)
            .with_log_file(work_dir.join(format!("ffmpeg_{}.log", operation)));
        match &self.limiter {
            Some(limiter) => runner.with_limiter(limiter.clone()),
            None => runner,
        }
    }
}

/// Frame size and duration of `video`, falling back to `fallback` sizes.
async fn video_geometry(video: &Path, fallback: (u32, u32)) -> (u32, u32, f64) {
    match probe_media(video).await {
        Ok(info) if info.width > 0 && info.height > 0 => (info.width, info.height, info.duration),
        Ok(info) => (fallback.0, fallback.1, info.duration),
        Err(e) => {
            debug!("Probe of {} failed, assuming {}x{}: {}", video.display(), fallback.0, fallback.1, e);
            (fallback.0, fallback.1, 0.0)
        }
    }
}

/// Remove `input` once `output` exists, if `input` belongs to `work_dir`.
async fn release_input(input: &Path, output: &Path, work_dir: &Path) {
    if input.starts_with(work_dir) && replace_intermediate(input, output).await {
        debug!("Removed intermediate {}", input.display());
    }
}
