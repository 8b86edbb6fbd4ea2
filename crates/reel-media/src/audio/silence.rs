//! Silence detection and trimming.

use std::path::Path;

use regex::Regex;
use reel_models::{SilenceConfig, SilenceRemoval};
use tracing::{info, warn};

use super::{AudioAssembler, TRIMMED_AUDIO_FILE};
use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;

/// Kept segments at or below this length are dropped.
const MIN_SEGMENT_SECS: f64 = 0.05;

/// A silent span reported by `silencedetect`, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceInterval {
    pub start: f64,
    pub end: f64,
}

/// Parse `silencedetect` output into silent spans.
///
/// A trailing `silence_start` without a matching end runs to `total_secs`.
pub fn parse_silence_intervals(log: &str, total_secs: f64) -> MediaResult<Vec<SilenceInterval>> {
    let start_re = Regex::new(r"silence_start: (-?[\d.]+)")
        .map_err(|e| MediaError::internal(e.to_string()))?;
    let end_re = Regex::new(r"silence_end: (-?[\d.]+)")
        .map_err(|e| MediaError::internal(e.to_string()))?;

    let mut intervals = Vec::new();
    let mut pending: Option<f64> = None;

    for line in log.lines() {
        if let Some(caps) = start_re.captures(line) {
            pending = caps[1].parse::<f64>().ok().map(|s| s.max(0.0));
        } else if let Some(caps) = end_re.captures(line) {
            if let (Some(start), Ok(end)) = (pending.take(), caps[1].parse::<f64>()) {
                if end > start {
                    intervals.push(SilenceInterval { start, end });
                }
            }
        }
    }

    if let Some(start) = pending {
        if total_secs > start {
            intervals.push(SilenceInterval {
                start,
                end: total_secs,
            });
        }
    }

    Ok(intervals)
}

/// A stretch of narration kept after trimming, in seconds.
///
/// The last segment has no end so anything past the expected length (the
/// caller's estimate can be short) survives the trim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeepSegment {
    pub start: f64,
    pub end: Option<f64>,
}

impl KeepSegment {
    /// Length, with an open end measured against `total_secs`.
    pub fn duration(&self, total_secs: f64) -> f64 {
        (self.end.unwrap_or(total_secs) - self.start).max(0.0)
    }
}

/// Complement of the silent spans, each cut padded inward by `keep_margin_secs`.
pub fn compute_keep_segments(
    silences: &[SilenceInterval],
    total_secs: f64,
    keep_margin_secs: f64,
) -> Vec<KeepSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0.0_f64;

    for silence in silences {
        let segment_end = (silence.start + keep_margin_secs).min(silence.end);
        if segment_end - cursor > MIN_SEGMENT_SECS {
            segments.push(KeepSegment {
                start: cursor,
                end: Some(segment_end),
            });
        }
        cursor = cursor.max((silence.end - keep_margin_secs).max(silence.start));
    }

    if total_secs - cursor > MIN_SEGMENT_SECS {
        segments.push(KeepSegment {
            start: cursor,
            end: None,
        });
    }

    segments
}

fn build_trim_graph(segments: &[KeepSegment]) -> String {
    let mut graph = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let trim = match segment.end {
            Some(end) => format!("atrim=start={:.3}:end={:.3}", segment.start, end),
            None => format!("atrim=start={:.3}", segment.start),
        };
        graph.push_str(&format!("[0:a]{},asetpts=PTS-STARTPTS[a{}];", trim, i));
    }
    for i in 0..segments.len() {
        graph.push_str(&format!("[a{}]", i));
    }
    graph.push_str(&format!("concat=n={}:v=0:a=1[out]", segments.len()));
    graph
}

impl AudioAssembler {
    /// Cut silent stretches out of the narration.
    ///
    /// Returns the input path and duration untouched when nothing is detected
    /// or when re-assembly fails.
    pub async fn remove_silence(
        &self,
        path: &Path,
        duration_ms: u64,
        config: &SilenceConfig,
        work_dir: &Path,
    ) -> MediaResult<SilenceRemoval> {
        let unchanged = SilenceRemoval::unchanged(path.to_path_buf(), duration_ms);
        // the summed chunk estimate can be shorter than the file
        let total_secs = match get_duration(path).await {
            Ok(secs) if secs > 0.0 => secs,
            Ok(_) | Err(_) => duration_ms as f64 / 1000.0,
        };

        let detect = FfmpegCommand::new("-")
            .log_level("info")
            .input(path)
            .audio_filter(format!(
                "silencedetect=noise={}dB:d={}",
                config.threshold_db, config.min_silence_seconds
            ))
            .output_args(["-f", "null"]);

        let log = match self.runner("silencedetect", work_dir).run_capture(&detect).await {
            Ok(log) => log,
            Err(e) => {
                warn!("Silence detection failed, keeping original audio: {}", e);
                return Ok(unchanged);
            }
        };

        let silences = parse_silence_intervals(&log, total_secs)?;
        if silences.is_empty() {
            info!("No silence detected in {}", path.display());
            return Ok(unchanged);
        }

        let keep = compute_keep_segments(&silences, total_secs, config.keep_margin_ms as f64 / 1000.0);
        if keep.is_empty() {
            warn!("Silence covers the whole narration, keeping original audio");
            return Ok(unchanged);
        }

        let output = work_dir.join(TRIMMED_AUDIO_FILE);
        let cmd = FfmpegCommand::new(&output)
            .input(path)
            .filter_complex(build_trim_graph(&keep))
            .map("[out]")
            .audio_codec("libmp3lame")
            .output_args(["-q:a", "2"]);

        if let Err(e) = self.runner("remove_silence", work_dir).run(&cmd).await {
            warn!("Silence removal failed, keeping original audio: {}", e);
            return Ok(unchanged);
        }

        let original_duration_ms = ((total_secs * 1000.0).round() as u64).max(duration_ms);
        let new_duration_ms = keep
            .iter()
            .map(|segment| (segment.duration(total_secs) * 1000.0).round() as u64)
            .sum::<u64>()
            .min(original_duration_ms);

        info!(
            silences = silences.len(),
            saved_ms = original_duration_ms - new_duration_ms,
            "Removed silence from narration"
        );

        Ok(SilenceRemoval {
            path: output,
            original_duration_ms,
            new_duration_ms,
            silences_removed: silences.len(),
            time_saved_ms: original_duration_ms - new_duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "\
[silencedetect @ 0x55] silence_start: 2.5
[silencedetect @ 0x55] silence_end: 4.0 | silence_duration: 1.5
size=N/A time=00:00:10.00 bitrate=N/A speed= 200x
[silencedetect @ 0x55] silence_start: 7.25
[silencedetect @ 0x55] silence_end: 8.5 | silence_duration: 1.25
";

    #[test]
    fn test_parse_intervals() {
        let intervals = parse_silence_intervals(SAMPLE_LOG, 10.0).unwrap();
        assert_eq!(
            intervals,
            vec![
                SilenceInterval { start: 2.5, end: 4.0 },
                SilenceInterval { start: 7.25, end: 8.5 },
            ]
        );
    }

    #[test]
    fn test_trailing_silence_runs_to_end() {
        let log = "silence_start: 9.0\n";
        let intervals = parse_silence_intervals(log, 12.0).unwrap();
        assert_eq!(intervals, vec![SilenceInterval { start: 9.0, end: 12.0 }]);
    }

    #[test]
    fn test_no_silence_detected() {
        let intervals = parse_silence_intervals("size=N/A time=00:00:10.00\n", 10.0).unwrap();
        assert!(intervals.is_empty());
    }

    #[test]
    fn test_keep_segments_padded_inward() {
        let silences = vec![
            SilenceInterval { start: 2.5, end: 4.0 },
            SilenceInterval { start: 7.25, end: 8.5 },
        ];
        let keep = compute_keep_segments(&silences, 10.0, 0.2);

        assert_eq!(keep.len(), 3);
        assert!(keep[0].start.abs() < 1e-9);
        assert!((keep[0].end.unwrap() - 2.7).abs() < 1e-9);
        assert!((keep[1].start - 3.8).abs() < 1e-9);
        assert!((keep[1].end.unwrap() - 7.45).abs() < 1e-9);
        assert!((keep[2].start - 8.3).abs() < 1e-9);
        assert_eq!(keep[2].end, None);
        assert!((keep[2].duration(10.0) - 1.7).abs() < 1e-9);
    }

    #[test]
    fn test_audio_past_expected_length_is_kept() {
        // expected 6 s, but silencedetect saw speech up to 9 s
        let log = "silence_start: 2.0\nsilence_end: 3.0\nsilence_start: 5.0\nsilence_end: 5.5\n";
        let silences = parse_silence_intervals(log, 6.0).unwrap();
        let keep = compute_keep_segments(&silences, 6.0, 0.0);

        let last = keep.last().unwrap();
        assert!((last.start - 5.5).abs() < 1e-9);
        assert_eq!(last.end, None);

        let graph = build_trim_graph(&keep);
        assert!(graph.contains("[0:a]atrim=start=5.500,asetpts=PTS-STARTPTS[a2];"));
        assert!(!graph.contains("end=6.000"));
    }

    #[test]
    fn test_tiny_segments_dropped() {
        let silences = vec![SilenceInterval { start: 0.0, end: 9.98 }];
        let keep = compute_keep_segments(&silences, 10.0, 0.0);
        assert!(keep.is_empty());
    }

    #[test]
    fn test_trim_graph() {
        let graph = build_trim_graph(&[
            KeepSegment { start: 0.0, end: Some(2.7) },
            KeepSegment { start: 3.8, end: None },
        ]);
        assert!(graph.starts_with("[0:a]atrim=start=0.000:end=2.700,asetpts=PTS-STARTPTS[a0];"));
        assert!(graph.contains("[0:a]atrim=start=3.800,asetpts=PTS-STARTPTS[a1];"));
        assert!(graph.ends_with("[a0][a1]concat=n=2:v=0:a=1[out]"));
    }

    #[tokio::test]
    async fn test_remove_silence_is_noop_without_silence() {
        if which::which("ffmpeg").is_err() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let tone = dir.path().join("tone.mp3");
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "sine=frequency=440:duration=3"])
            .arg(&tone)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let result = AudioAssembler::new()
            .remove_silence(&tone, 3_000, &SilenceConfig::default(), dir.path())
            .await
            .unwrap();

        assert_eq!(result.path, tone);
        assert_eq!(result.new_duration_ms, 3_000);
        assert_eq!(result.silences_removed, 0);
    }

    #[tokio::test]
    async fn test_remove_silence_keeps_audio_past_short_estimate() {
        if which::which("ffmpeg").is_err() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let speech = dir.path().join("speech.mp3");
        // 4 s tone, muted between 1 s and 2 s
        let status = tokio::process::Command::new("ffmpeg")
            .args([
                "-y",
                "-v",
                "error",
                "-f",
                "lavfi",
                "-i",
                "sine=frequency=440:duration=4,volume=enable='between(t,1,2)':volume=0",
            ])
            .arg(&speech)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        // the chunk estimate says 2.5 s
        let result = AudioAssembler::new()
            .remove_silence(&speech, 2_500, &SilenceConfig::default(), dir.path())
            .await
            .unwrap();

        assert_eq!(result.silences_removed, 1);
        assert!(result.original_duration_ms >= 3_900);
        assert!(result.new_duration_ms > 2_500);
        let trimmed = get_duration(&result.path).await.unwrap();
        assert!(trimmed > 2.5, "trimmed audio is {trimmed} s");
    }
}
