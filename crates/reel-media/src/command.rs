//! FFmpeg command builder and runner.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Bytes read from the end of an encoder log when reporting a failure.
const LOG_TAIL_BYTES: u64 = 16 * 1024;
/// Maximum length of an error line taken from the log.
const ERROR_LINE_MAX_CHARS: usize = 200;
/// Maximum length of the raw tail reported when no error line is found.
const RAW_TAIL_MAX_CHARS: usize = 300;

#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in `-i` order
    inputs: Vec<FfmpegInput>,
    /// Output file path ("-" for null outputs)
    output: PathBuf,
    /// Output arguments (after all inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a plain file input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path)
    }

    /// Add an input preceded by its own arguments.
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            source: path.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Add a still image repeated for `seconds` at `fps`.
    pub fn looped_image(self, path: impl AsRef<Path>, seconds: f64, fps: u32) -> Self {
        self.input_with_args(
            [
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                fps.to_string(),
                "-t".to_string(),
                format!("{:.3}", seconds),
            ],
            path,
        )
    }

    /// Add a solid color source from the lavfi device.
    pub fn color_source(mut self, color: u32, width: u32, height: u32, fps: u32, seconds: f64) -> Self {
        self.inputs.push(FfmpegInput {
            args: vec![
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                format!("{:.3}", seconds),
            ],
            source: format!("color=c=0x{:06X}:s={}x{}:r={}", color, width, height, fps),
        });
        self
    }

    /// Add a silent audio source from the lavfi device.
    pub fn silence_source(mut self, seconds: f64) -> Self {
        self.inputs.push(FfmpegInput {
            args: vec![
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                format!("{:.3}", seconds),
            ],
            source: "anullsrc=r=44100:cl=stereo".to_string(),
        });
        self
    }

    /// Add a concat-demuxer list file as input.
    pub fn concat_list(self, list: impl AsRef<Path>) -> Self {
        self.input_with_args(["-f", "concat", "-safe", "0"], list)
    }

    /// Add output arguments.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Cap encoder threads.
    pub fn threads(self, threads: u32) -> Self {
        self.output_arg("-threads").output_arg(threads.to_string())
    }

    /// Drop audio from the output.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with timeout, log capture and a process limit.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    /// Label used in logs and metrics
    operation: String,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
    /// File receiving the encoder's stderr
    log_path: Option<PathBuf>,
    /// Shared cap on concurrently running encoder processes
    limiter: Option<Arc<Semaphore>>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Write stderr to `path` instead of buffering it.
    ///
    /// The file is removed when the command succeeds.
    pub fn with_log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Share a process limit with other runners.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let _permit = self.acquire().await?;
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!(operation = %self.operation, "Running FFmpeg: ffmpeg {}", args.join(" "));

        let started = Instant::now();
        let result = match &self.log_path {
            Some(log_path) => self.run_logged(&args, log_path).await,
            None => self.run_buffered(&args).await.map(|_| ()),
        };

        histogram!("reel_ffmpeg_duration_seconds", "operation" => self.operation.clone())
            .record(started.elapsed().as_secs_f64());
        if result.is_err() {
            counter!("reel_ffmpeg_failures_total", "operation" => self.operation.clone()).increment(1);
        }

        result
    }

    /// Run an FFmpeg command and return its stderr.
    ///
    /// Used for analysis filters that report through the log (e.g. `silencedetect`).
    pub async fn run_capture(&self, cmd: &FfmpegCommand) -> MediaResult<String> {
        let _permit = self.acquire().await?;
        check_ffmpeg()?;
        let args = cmd.build_args();
        debug!(operation = %self.operation, "Running FFmpeg: ffmpeg {}", args.join(" "));
        self.run_buffered(&args).await
    }

    /// Wait for a process slot when a limiter is shared.
    async fn acquire(&self) -> MediaResult<Option<OwnedSemaphorePermit>> {
        match &self.limiter {
            Some(limiter) => limiter
                .clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| MediaError::internal("ffmpeg limiter closed")),
            None => Ok(None),
        }
    }

    async fn run_logged(&self, args: &[String], log_path: &Path) -> MediaResult<()> {
        let log_file = std::fs::File::create(log_path)?;

        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true)
            .spawn()?;

        let status = match self.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        operation = %self.operation,
                        "FFmpeg timed out after {} seconds, killing process", secs
                    );
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(secs));
                }
            },
            None => child.wait().await?,
        };

        if status.success() {
            if let Err(e) = tokio::fs::remove_file(log_path).await {
                debug!("Could not remove encoder log {}: {}", log_path.display(), e);
            }
            return Ok(());
        }

        let tail = read_log_tail(log_path, LOG_TAIL_BYTES).await.unwrap_or_default();
        Err(MediaError::ffmpeg_failed(
            format!("{} failed: {}", self.operation, summarize_log(&tail)),
            Some(tail),
            status.code(),
        ))
    }

    async fn run_buffered(&self, args: &[String]) -> MediaResult<String> {
        let child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await {
                    Ok(output) => output?,
                    Err(_) => {
                        warn!(
                            operation = %self.operation,
                            "FFmpeg timed out after {} seconds, killing process", secs
                        );
                        return Err(MediaError::Timeout(secs));
                    }
                }
            }
            None => child.wait_with_output().await?,
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            Ok(stderr)
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("{} failed: {}", self.operation, summarize_log(&stderr)),
                Some(stderr),
                output.status.code(),
            ))
        }
    }
}

/// Read at most `max_bytes` from the end of a log file.
pub async fn read_log_tail(path: &Path, max_bytes: u64) -> MediaResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes)).await?;
    }
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

/// Pick the most useful part of an encoder log.
///
/// Prefers the last line mentioning an error, otherwise the raw tail.
pub fn summarize_log(log: &str) -> String {
    let error_line = log
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.to_lowercase().contains("error"));

    match error_line {
        Some(line) => line.chars().take(ERROR_LINE_MAX_CHARS).collect(),
        None => {
            let trimmed = log.trim();
            let count = trimmed.chars().count();
            if count == 0 {
                "no encoder output".to_string()
            } else {
                trimmed.chars().skip(count.saturating_sub(RAW_TAIL_MAX_CHARS)).collect()
            }
        }
    }
}

/// Escape a path for use inside a quoted filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
}

/// Format one line of a concat-demuxer list.
///
/// The demuxer resolves relative entries against the list file's directory,
/// so relative paths are made absolute against the working directory first.
pub fn concat_list_entry(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file '{}'", absolute.to_string_lossy().replace('\'', "'\\''"))
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
