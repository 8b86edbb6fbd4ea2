//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings read from the environment.
///
/// Pipeline behaviour (voices, composition, music...) lives in
/// [`reel_models::PipelineConfig`]; this struct only covers where the worker
/// keeps its files, how hard it may load the machine and which credentials it
/// hands to the remote services.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Base directory for per-job temp directories
    pub temp_dir: PathBuf,
    /// Where finished videos are written
    pub output_dir: PathBuf,
    /// Music library with one sub-directory per mood
    pub music_library: PathBuf,
    /// Maximum concurrent FFmpeg processes across all media stages
    pub max_ffmpeg_processes: usize,
    /// Log lines kept on each job snapshot
    pub max_log_lines: usize,
    /// Job snapshots kept in memory
    pub job_store_capacity: usize,
    /// Batch snapshots kept in memory
    pub batch_store_capacity: usize,
    /// How often a paused batch re-checks its control flags
    pub batch_poll_interval: Duration,
    /// Optional JSON file with a `PipelineConfig`
    pub pipeline_config_path: Option<PathBuf>,
    /// Optional JSON file with settings merged into every job of the batch
    pub batch_override_path: Option<PathBuf>,
    pub elevenlabs_api_key: String,
    pub wavespeed_api_key: String,
    pub assemblyai_api_key: String,
    /// Only needed for generated background music
    pub suno_api_key: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("/tmp/scriptreel"),
            output_dir: PathBuf::from("output"),
            music_library: PathBuf::from("music"),
            max_ffmpeg_processes: 2,
            max_log_lines: 100,
            job_store_capacity: 100,
            batch_store_capacity: 20,
            batch_poll_interval: Duration::from_secs(1),
            pipeline_config_path: None,
            batch_override_path: None,
            elevenlabs_api_key: String::new(),
            wavespeed_api_key: String::new(),
            assemblyai_api_key: String::new(),
            suno_api_key: String::new(),
        }
    }
}

// Keys stay out of logs.
impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("temp_dir", &self.temp_dir)
            .field("output_dir", &self.output_dir)
            .field("music_library", &self.music_library)
            .field("max_ffmpeg_processes", &self.max_ffmpeg_processes)
            .field("max_log_lines", &self.max_log_lines)
            .field("job_store_capacity", &self.job_store_capacity)
            .field("batch_store_capacity", &self.batch_store_capacity)
            .field("batch_poll_interval", &self.batch_poll_interval)
            .field("pipeline_config_path", &self.pipeline_config_path)
            .field("batch_override_path", &self.batch_override_path)
            .field("elevenlabs_api_key", &mask(&self.elevenlabs_api_key))
            .field("wavespeed_api_key", &mask(&self.wavespeed_api_key))
            .field("assemblyai_api_key", &mask(&self.assemblyai_api_key))
            .field("suno_api_key", &mask(&self.suno_api_key))
            .finish()
    }
}

fn mask(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<set>"
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            temp_dir: std::env::var("WORKER_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            music_library: std::env::var("WORKER_MUSIC_LIBRARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.music_library),
            max_ffmpeg_processes: std::env::var("WORKER_MAX_FFMPEG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_ffmpeg_processes),
            max_log_lines: std::env::var("WORKER_MAX_LOG_LINES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_log_lines),
            job_store_capacity: std::env::var("WORKER_JOB_STORE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.job_store_capacity),
            batch_store_capacity: std::env::var("WORKER_BATCH_STORE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_store_capacity),
            batch_poll_interval: std::env::var("WORKER_BATCH_POLL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_poll_interval),
            pipeline_config_path: std::env::var("WORKER_PIPELINE_CONFIG").ok().map(PathBuf::from),
            batch_override_path: std::env::var("WORKER_BATCH_OVERRIDE").ok().map(PathBuf::from),
            elevenlabs_api_key: std::env::var("ELEVENLABS_API_KEY").unwrap_or_default(),
            wavespeed_api_key: std::env::var("WAVESPEED_API_KEY").unwrap_or_default(),
            assemblyai_api_key: std::env::var("ASSEMBLYAI_API_KEY").unwrap_or_default(),
            suno_api_key: std::env::var("SUNO_API_KEY").unwrap_or_default(),
        }
    }

    /// Names of the required API keys that are not set.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.elevenlabs_api_key.is_empty() {
            missing.push("ELEVENLABS_API_KEY");
        }
        if self.wavespeed_api_key.is_empty() {
            missing.push("WAVESPEED_API_KEY");
        }
        if self.assemblyai_api_key.is_empty() {
            missing.push("ASSEMBLYAI_API_KEY");
        }
        missing
    }
}
