//! Effect overlay blended over the composed video.

use std::path::Path;

use reel_models::{BlendMode, OverlayConfig};
use tracing::{info, warn};

use super::{release_input, video_geometry, PostProcessed, PostProcessor};
use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_output;
use crate::probe::get_duration;

pub const OVERLAY_VIDEO_FILE: &str = "video_with_effect.mp4";

/// Blend graph for an effect clip of `effect_secs` over a video of `video_secs`.
///
/// Shorter effects are looped, longer ones trimmed; the effect is scaled to
/// cover the frame and cropped.
pub fn overlay_graph(
    video_secs: f64,
    effect_secs: f64,
    width: u32,
    height: u32,
    mode: BlendMode,
    opacity: f64,
) -> String {
    let timing = if effect_secs > 0.0 && effect_secs < video_secs {
        let loops = (video_secs / effect_secs) as u64 + 1;
        format!(
            "loop=loop={}:size=999999:start=0,setpts=PTS-STARTPTS,trim=0:{:.3},setpts=PTS-STARTPTS",
            loops, video_secs
        )
    } else {
        format!("trim=0:{:.3},setpts=PTS-STARTPTS", video_secs)
    };

    let alpha = if opacity < 1.0 {
        format!(",format=rgba,colorchannelmixer=aa={:.2}", opacity.max(0.0))
    } else {
        String::new()
    };

    format!(
        "[1:v]{timing},scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}{alpha}[fx];\
         [0:v][fx]blend=all_mode={mode}:shortest=1[outv]",
        timing = timing,
        w = width,
        h = height,
        alpha = alpha,
        mode = mode.as_str()
    )
}

impl PostProcessor {
    /// Blend the configured effect clip over `input`.
    pub async fn apply_overlay(
        &self,
        input: &Path,
        config: &OverlayConfig,
        fallback_size: (u32, u32),
        work_dir: &Path,
    ) -> MediaResult<PostProcessed> {
        let effect = config
            .effect_path
            .as_deref()
            .ok_or_else(|| MediaError::empty_input("overlay enabled without an effect file"))?;
        if !effect.exists() {
            return Err(MediaError::FileNotFound(effect.to_path_buf()));
        }

        let (width, height, video_secs) = video_geometry(input, fallback_size).await;
        let effect_secs = get_duration(effect).await.unwrap_or(0.0);
        let output = work_dir.join(OVERLAY_VIDEO_FILE);

        info!(
            effect = %effect.display(),
            mode = config.blend_mode.as_str(),
            "Applying overlay effect over {:.1}s video",
            video_secs
        );

        let blended = FfmpegCommand::new(&output)
            .input(input)
            .input(effect)
            .filter_complex(overlay_graph(
                video_secs,
                effect_secs,
                width,
                height,
                config.blend_mode,
                config.opacity,
            ))
            .map("[outv]")
            .map("0:a?")
            .video_codec("libx264")
            .preset("fast")
            .crf(18)
            .audio_codec("aac")
            .audio_bitrate("192k")
            .output_arg("-shortest");

        if let Err(e) = self.runner("overlay_blend", work_dir).run(&blended).await {
            warn!("Blend overlay failed, retrying with plain overlay: {}", e);
            let plain = FfmpegCommand::new(&output)
                .input(input)
                .input_with_args(["-stream_loop", "-1"], effect)
                .filter_complex(format!(
                    "[1:v]scale={w}:{h}[fx];[0:v][fx]overlay=0:0:shortest=1[outv]",
                    w = width,
                    h = height
                ))
                .map("[outv]")
                .map("0:a?")
                .video_codec("libx264")
                .preset("fast")
                .crf(18)
                .audio_codec("copy");
            self.runner("overlay_plain", work_dir).run(&plain).await?;
        }

        let file_size_bytes = ensure_output(&output, 1).await?;
        release_input(input, &output, work_dir).await;

        Ok(PostProcessed {
            duration_seconds: get_duration(&output).await.unwrap_or(video_secs),
            path: output,
            file_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_effect_is_looped() {
        let graph = overlay_graph(30.0, 8.0, 1920, 1080, BlendMode::Lighten, 1.0);
        assert!(graph.starts_with("[1:v]loop=loop=4:size=999999:start=0"));
        assert!(graph.contains("trim=0:30.000"));
        assert!(graph.contains("force_original_aspect_ratio=increase,crop=1920:1080[fx]"));
        assert!(graph.ends_with("[0:v][fx]blend=all_mode=lighten:shortest=1[outv]"));
        assert!(!graph.contains("colorchannelmixer"));
    }

    #[test]
    fn test_long_effect_is_trimmed_with_opacity() {
        let graph = overlay_graph(10.0, 60.0, 1280, 720, BlendMode::Screen, 0.5);
        assert!(graph.starts_with("[1:v]trim=0:10.000"));
        assert!(graph.contains("format=rgba,colorchannelmixer=aa=0.50[fx]"));
        assert!(graph.contains("all_mode=screen"));
    }

    #[tokio::test]
    async fn test_missing_effect_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = OverlayConfig {
            enabled: true,
            effect_path: Some(dir.path().join("nope.mp4")),
            ..OverlayConfig::default()
        };
        let result = PostProcessor::new()
            .apply_overlay(&dir.path().join("composed.mp4"), &config, (1920, 1080), dir.path())
            .await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
