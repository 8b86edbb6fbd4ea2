//! Narration and background music mixing.

use std::future::Future;
use std::path::Path;

use reel_models::{MixedAudio, MusicConfig, MusicSegment};
use tracing::{info, warn};

use super::{AudioAssembler, MIXED_AUDIO_FILE};
use crate::command::FfmpegCommand;
use crate::error::MediaResult;

/// Sidechain compressor settings derived from one 0..1 intensity knob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuckingParams {
    pub threshold: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl DuckingParams {
    /// Higher intensity gives a lower threshold, a higher ratio and a longer release.
    pub fn from_intensity(intensity: f64) -> Self {
        let i = intensity.clamp(0.0, 1.0);
        Self {
            threshold: 0.05 - 0.03 * i,
            ratio: 4.0 + 8.0 * i,
            attack_ms: 50.0,
            release_ms: 300.0 + 400.0 * i,
        }
    }

    fn filter(&self) -> String {
        format!(
            "sidechaincompress=threshold={:.3}:ratio={:.1}:attack={:.0}:release={:.0}",
            self.threshold, self.ratio, self.attack_ms, self.release_ms
        )
    }
}

/// Builds the music bus: each segment trimmed, scaled, faded and delayed into place.
///
/// Music inputs start at index 1 (input 0 is the narration). Returns `None`
/// when no segment overlaps the narration.
fn build_music_bus(segments: &[MusicSegment], narration_secs: f64) -> Option<String> {
    let mut graph = String::new();
    let mut labels = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let start = segment.start_ms as f64 / 1000.0;
        let len = (segment.duration_ms() as f64 / 1000.0).min(narration_secs - start);
        if len <= 0.0 {
            continue;
        }
        let fade_in = (segment.fade_in_ms as f64 / 1000.0).min(len / 2.0);
        let fade_out = (segment.fade_out_ms as f64 / 1000.0).min(len / 2.0);
        let delay_ms = segment.start_ms;
        let label = format!("m{}", i);

        graph.push_str(&format!(
            "[{input}:a]atrim=0:{len:.3},asetpts=PTS-STARTPTS,volume={vol:.3},\
             afade=t=in:st=0:d={fi:.3},afade=t=out:st={fo_start:.3}:d={fo:.3},\
             adelay={delay}|{delay}[{label}];",
            input = i + 1,
            len = len,
            vol = segment.volume,
            fi = fade_in,
            fo_start = (len - fade_out).max(0.0),
            fo = fade_out,
            delay = delay_ms,
            label = label,
        ));
        labels.push(label);
    }

    match labels.len() {
        0 => None,
        1 => {
            graph.push_str(&format!("[{}]anull[music]", labels[0]));
            Some(graph)
        }
        n => {
            for label in &labels {
                graph.push_str(&format!("[{}]", label));
            }
            graph.push_str(&format!(
                "amix=inputs={}:duration=longest:dropout_transition=0[music]",
                n
            ));
            Some(graph)
        }
    }
}

fn ducked_graph(bus: &str, params: &DuckingParams) -> String {
    format!(
        "{bus};[0:a]asplit=2[narr][key];[music][key]{comp}[ducked];\
         [narr][ducked]amix=inputs=2:duration=first:dropout_transition=0[out]",
        bus = bus,
        comp = params.filter(),
    )
}

fn simple_graph(bus: &str) -> String {
    format!(
        "{};[0:a][music]amix=inputs=2:duration=first:dropout_transition=0[out]",
        bus
    )
}

/// One ffmpeg mix pass: the runner operation name and its filter graph.
#[derive(Debug, Clone, PartialEq)]
struct MixAttempt {
    operation: &'static str,
    graph: String,
}

/// Mix passes in the order they are tried. Ducking goes first when enabled.
fn mix_attempts(bus: &str, config: &MusicConfig) -> Vec<MixAttempt> {
    let mut attempts = Vec::with_capacity(2);
    if config.ducking_enabled {
        let params = DuckingParams::from_intensity(config.ducking_intensity);
        attempts.push(MixAttempt {
            operation: "mix_ducked",
            graph: ducked_graph(bus, &params),
        });
    }
    attempts.push(MixAttempt {
        operation: "mix_simple",
        graph: simple_graph(bus),
    });
    attempts
}

/// Runs attempts until one succeeds and returns its operation name.
async fn first_successful_mix<F, Fut>(attempts: Vec<MixAttempt>, mut run: F) -> Option<&'static str>
where
    F: FnMut(&'static str, String) -> Fut,
    Fut: Future<Output = MediaResult<()>>,
{
    for attempt in attempts {
        match run(attempt.operation, attempt.graph).await {
            Ok(()) => return Some(attempt.operation),
            Err(e) => warn!(operation = attempt.operation, "Mix pass failed: {}", e),
        }
    }
    None
}

impl AudioAssembler {
    /// Mix narration with background music.
    ///
    /// Music problems never fail the stage: a failed ducked mix falls back to a
    /// simple mix, and a failed simple mix falls back to the bare narration.
    pub async fn mix(
        &self,
        narration: &Path,
        narration_ms: u64,
        segments: &[MusicSegment],
        config: &MusicConfig,
        work_dir: &Path,
    ) -> MediaResult<MixedAudio> {
        let output = work_dir.join(MIXED_AUDIO_FILE);
        let narration_secs = narration_ms as f64 / 1000.0;

        let bus = match build_music_bus(segments, narration_secs) {
            Some(bus) => bus,
            None => return self.narration_only(narration, narration_ms, &output).await,
        };

        let attempts = mix_attempts(&bus, config);
        let output_path = output.as_path();
        let mixed_with = first_successful_mix(attempts, move |operation, graph| {
            self.run_mix(narration, segments, graph, output_path, operation, work_dir)
        })
        .await;

        match mixed_with {
            Some(operation) => {
                info!(segments = segments.len(), operation, "Mixed narration with music");
                Ok(mixed(output, narration_ms, true))
            }
            None => {
                warn!("Every mix pass failed, using narration only");
                self.narration_only(narration, narration_ms, &output).await
            }
        }
    }

    async fn run_mix(
        &self,
        narration: &Path,
        segments: &[MusicSegment],
        graph: String,
        output: &Path,
        operation: &str,
        work_dir: &Path,
    ) -> MediaResult<()> {
        let mut cmd = FfmpegCommand::new(output).input(narration);
        for segment in segments {
            cmd = cmd.input_with_args(["-stream_loop", "-1"], &segment.music_path);
        }
        let cmd = cmd
            .filter_complex(graph)
            .map("[out]")
            .audio_codec("libmp3lame")
            .audio_bitrate("192k");
        self.runner(operation, work_dir).run(&cmd).await
    }

    async fn narration_only(&self, narration: &Path, narration_ms: u64, output: &Path) -> MediaResult<MixedAudio> {
        tokio::fs::copy(narration, output).await?;
        Ok(mixed(output.to_path_buf(), narration_ms, false))
    }
}

fn mixed(path: std::path::PathBuf, duration_ms: u64, has_music: bool) -> MixedAudio {
    MixedAudio {
        path,
        duration_ms,
        has_music,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn segment(start_ms: u64, end_ms: u64) -> MusicSegment {
        MusicSegment {
            music_path: PathBuf::from("/music/calmo/track.mp3"),
            mood: "calmo".into(),
            start_ms,
            end_ms,
            fade_in_ms: 1_000,
            fade_out_ms: 2_000,
            volume: 0.08,
        }
    }

    #[test]
    fn test_ducking_params_scale_with_intensity() {
        let soft = DuckingParams::from_intensity(0.0);
        let hard = DuckingParams::from_intensity(1.0);
        assert!(hard.ratio > soft.ratio);
        assert!((soft.ratio - 4.0).abs() < 1e-9);
        assert!((hard.ratio - 12.0).abs() < 1e-9);
        assert!(hard.threshold < soft.threshold);
        assert_eq!(DuckingParams::from_intensity(3.0), hard);
    }

    #[test]
    fn test_single_segment_bus() {
        let bus = build_music_bus(&[segment(0, 30_000)], 20.0).unwrap();
        assert!(bus.starts_with("[1:a]atrim=0:20.000"));
        assert!(bus.contains("afade=t=out:st=18.000:d=2.000"));
        assert!(bus.ends_with("[m0]anull[music]"));
    }

    #[test]
    fn test_multiple_segments_are_delayed_and_summed() {
        let bus = build_music_bus(&[segment(0, 10_000), segment(10_000, 20_000)], 20.0).unwrap();
        assert!(bus.contains("[2:a]atrim=0:10.000"));
        assert!(bus.contains("adelay=10000|10000[m1]"));
        assert!(bus.ends_with("[m0][m1]amix=inputs=2:duration=longest:dropout_transition=0[music]"));
    }

    #[test]
    fn test_segments_past_narration_are_ignored() {
        assert!(build_music_bus(&[segment(30_000, 40_000)], 20.0).is_none());
    }

    #[test]
    fn test_ducked_graph_keys_off_narration() {
        let graph = ducked_graph("BUS", &DuckingParams::from_intensity(0.5));
        assert!(graph.contains("[0:a]asplit=2[narr][key]"));
        assert!(graph.contains("[music][key]sidechaincompress="));
        assert!(graph.ends_with("[narr][ducked]amix=inputs=2:duration=first:dropout_transition=0[out]"));
    }

    #[tokio::test]
    async fn test_no_music_copies_narration() {
        let dir = tempfile::TempDir::new().unwrap();
        let narration = dir.path().join("audio_complete.mp3");
        tokio::fs::write(&narration, b"narration").await.unwrap();

        let result = AudioAssembler::new()
            .mix(&narration, 5_000, &[], &MusicConfig::default(), dir.path())
            .await
            .unwrap();

        assert!(!result.has_music);
        assert_eq!(result.duration_ms, 5_000);
        assert_eq!(tokio::fs::read(&result.path).await.unwrap(), b"narration");
    }

    #[tokio::test]
    async fn test_corrupt_music_falls_back_to_narration() {
        let dir = tempfile::TempDir::new().unwrap();
        let narration = dir.path().join("audio_complete.mp3");
        tokio::fs::write(&narration, b"narration").await.unwrap();
        let mut broken = segment(0, 5_000);
        broken.music_path = dir.path().join("does_not_exist.mp3");

        let result = AudioAssembler::new()
            .mix(&narration, 5_000, &[broken], &MusicConfig::default(), dir.path())
            .await
            .unwrap();

        assert!(result.path.exists());
        assert!(!result.has_music);
    }

    #[test]
    fn test_ducked_pass_comes_first() {
        let config = MusicConfig {
            ducking_enabled: true,
            ..MusicConfig::default()
        };
        let attempts = mix_attempts("BUS", &config);
        let operations: Vec<_> = attempts.iter().map(|a| a.operation).collect();
        assert_eq!(operations, vec!["mix_ducked", "mix_simple"]);
        assert!(attempts[1].graph.ends_with("[0:a][music]amix=inputs=2:duration=first:dropout_transition=0[out]"));

        let plain = MusicConfig {
            ducking_enabled: false,
            ..MusicConfig::default()
        };
        let operations: Vec<_> = mix_attempts("BUS", &plain).iter().map(|a| a.operation).collect();
        assert_eq!(operations, vec!["mix_simple"]);
    }

    #[tokio::test]
    async fn test_failed_ducked_mix_falls_back_to_simple_mix() {
        let config = MusicConfig {
            ducking_enabled: true,
            ..MusicConfig::default()
        };
        let mut tried = Vec::new();

        let used = first_successful_mix(mix_attempts("BUS", &config), |operation, graph| {
            tried.push((operation, graph.contains("sidechaincompress")));
            async move {
                if operation == "mix_ducked" {
                    Err(crate::error::MediaError::ffmpeg_failed("sidechaincompress rejected input", None, Some(1)))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(used, Some("mix_simple"));
        assert_eq!(tried, vec![("mix_ducked", true), ("mix_simple", false)]);
    }

    #[tokio::test]
    async fn test_all_mix_passes_failing_yields_none() {
        let config = MusicConfig {
            ducking_enabled: true,
            ..MusicConfig::default()
        };
        let mut calls = 0;
        let used = first_successful_mix(mix_attempts("BUS", &config), |_, _| {
            calls += 1;
            async { Err(crate::error::MediaError::InvalidMedia("no audio stream".into())) }
        })
        .await;

        assert_eq!(used, None);
        assert_eq!(calls, 2);
    }
}
