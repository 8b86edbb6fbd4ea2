//! Joining rendered batches and muxing the soundtrack.

use std::path::{Path, PathBuf};

use reel_models::AudioOutputConfig;
use tracing::info;

use super::filters::{batch_crossfade_graph, VIDEO_OUT};
use crate::command::{concat_list_entry, FfmpegCommand};

/// How rendered batches become one video stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StitchPlan {
    /// One batch, used as is
    Reuse(PathBuf),
    /// Re-encode with short cross-fades between batches
    Crossfade,
    /// Concat demuxer with stream copy
    Concat,
}

/// Pick the join strategy for `batches` rendered files.
pub fn stitch_plan(batches: &[PathBuf], max_batches_for_crossfade: usize, fade: f64) -> StitchPlan {
    match batches {
        [only] => StitchPlan::Reuse(only.clone()),
        _ if fade > 0.0 && batches.len() <= max_batches_for_crossfade => StitchPlan::Crossfade,
        _ => StitchPlan::Concat,
    }
}

/// Cross-fade re-encode of the batches into `output`.
pub fn crossfade_command(
    batches: &[PathBuf],
    durations: &[f64],
    fade: f64,
    preset: &str,
    crf: u8,
    threads: u32,
    output: &Path,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output);
    for batch in batches {
        cmd = cmd.input(batch);
    }
    cmd.filter_complex(batch_crossfade_graph(durations, fade))
        .map(format!("[{}]", VIDEO_OUT))
        .video_codec("libx264")
        .preset(preset)
        .crf(crf)
        .output_args(["-pix_fmt", "yuv420p"])
        .no_audio()
        .threads(threads)
}

/// Concat-demuxer list for stream-copy joins.
pub fn concat_list(batches: &[PathBuf]) -> String {
    batches
        .iter()
        .map(|b| concat_list_entry(b) + "\n")
        .collect()
}

/// Stream-copy join reading the list at `list_path`.
pub fn concat_command(list_path: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .concat_list(list_path)
        .stream_copy()
}

/// Attach the soundtrack to the silent video without re-encoding the picture.
pub fn mux_command(video: &Path, audio: &Path, config: &AudioOutputConfig, output: &Path) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output)
        .input(video)
        .input(audio)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
        .audio_codec(config.codec.encoder())
        .audio_bitrate(format!("{}k", config.bitrate_kbps));

    if config.normalize {
        info!(target_lufs = config.target_lufs, "Normalizing loudness in final mux");
        cmd = cmd.audio_filter(format!("loudnorm=I={}:TP=-1.5:LRA=11", config.target_lufs));
    }

    cmd.output_arg("-shortest").faststart()
}
