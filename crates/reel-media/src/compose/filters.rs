//! Filter graph construction for batch renders and batch joins.

use std::f64::consts::PI;
use std::path::Path;

use reel_models::CompositionConfig;

use super::plan::{SceneClip, SceneSource, Zoom, MAX_SCENE_TRANSITION_SECS, MAX_ZOOM_INTENSITY};
use crate::command::FfmpegCommand;

/// Label of the final video stream in every graph built here.
pub const VIDEO_OUT: &str = "vout";

/// Effects switched on for a whole render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderEffects {
    pub ken_burns: bool,
    pub transitions: bool,
}

impl RenderEffects {
    /// Effects allowed for a video of `scene_count` scenes.
    pub fn for_scene_count(scene_count: usize, config: &CompositionConfig) -> Self {
        Self {
            ken_burns: config.ken_burns.enabled
                && scene_count <= config.batching.max_scenes_for_ken_burns,
            transitions: config.transition.enabled
                && scene_count <= config.batching.max_scenes_for_transitions,
        }
    }
}

/// Filter chain turning input `input` into the normalized stream `[v{input}]`.
pub fn scene_chain(input: usize, clip: &SceneClip, config: &CompositionConfig, effects: RenderEffects) -> String {
    let (w, h, fps) = (config.width, config.height, config.fps);
    let mut filters: Vec<String> = Vec::new();

    match clip.source {
        SceneSource::Image(_) => {
            filters.push(format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease:flags=lanczos",
                w = w,
                h = h
            ));
            filters.push(format!("pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black", w = w, h = h));
            filters.push("setsar=1".to_string());

            if effects.ken_burns && config.ken_burns.intensity > 0.0 {
                filters.push(zoompan(clip, config));
            }
        }
        SceneSource::Color(_) => filters.push("setsar=1".to_string()),
    }

    filters.push(format!("fps={}", fps));
    filters.push("format=yuv420p".to_string());

    if config.vignette.enabled {
        let angle = PI * config.vignette.intensity.min(0.5) / 2.0;
        filters.push(format!("vignette=angle={:.4}", angle));
    }
    if config.grain.enabled {
        let strength = ((config.grain.intensity * 20.0) as u32).min(15);
        filters.push(format!("noise=alls={}:allf=t", strength));
    }

    filters.push("settb=AVTB".to_string());
    filters.push("setpts=PTS-STARTPTS".to_string());

    format!("[{}:v]{}[v{}]", input, filters.join(","), input)
}

/// Zoom whose factor depends only on the output frame number over the
/// scene's frame count.
fn zoompan(clip: &SceneClip, config: &CompositionConfig) -> String {
    let intensity = config.ken_burns.intensity.min(MAX_ZOOM_INTENSITY);
    let frames = ((clip.duration * config.fps as f64).round() as u64).max(1);
    let zoom = match clip.zoom {
        Zoom::In => format!("1+{:.4}*on/{}", intensity, frames),
        Zoom::Out => format!("{:.4}-{:.4}*on/{}", 1.0 + intensity, intensity, frames),
    };
    format!(
        "zoompan=z='{zoom}':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':d=1:s={w}x{h}:fps={fps}",
        zoom = zoom,
        w = config.width,
        h = config.height,
        fps = config.fps
    )
}

/// Cross-fade length used inside a batch.
pub fn scene_transition_secs(clips: &[SceneClip], config: &CompositionConfig) -> f64 {
    let shortest = clips
        .iter()
        .map(|c| c.duration)
        .fold(f64::INFINITY, f64::min);
    config
        .transition
        .duration_seconds
        .min(MAX_SCENE_TRANSITION_SECS)
        .min(shortest / 2.0)
        .max(0.0)
}

/// Input length for each clip.
///
/// With cross-fades every clip but the last is extended by the overlap so the
/// batch keeps the scenes' timeline length.
pub fn input_durations(clips: &[SceneClip], overlap: f64) -> Vec<f64> {
    let last = clips.len().saturating_sub(1);
    clips
        .iter()
        .enumerate()
        .map(|(i, c)| if i < last { c.duration + overlap } else { c.duration })
        .collect()
}

/// Join normalized streams `[v0]..[v{n-1}]` into `[vout]`.
fn join_scenes(clips: &[SceneClip], overlap: f64, transitions: bool) -> String {
    let n = clips.len();
    if n == 1 {
        return format!("[v0]null[{}]", VIDEO_OUT);
    }

    if !transitions || overlap <= 0.0 {
        let inputs: String = (0..n).map(|i| format!("[v{}]", i)).collect();
        return format!("{}concat=n={}:v=1:a=0[{}]", inputs, n, VIDEO_OUT);
    }

    let mut parts = Vec::with_capacity(n - 1);
    let mut previous = "v0".to_string();
    let mut offset = 0.0;
    for i in 1..n {
        // extended inputs make each fade start exactly on the scene boundary
        offset += clips[i - 1].duration;
        let out = if i == n - 1 {
            VIDEO_OUT.to_string()
        } else {
            format!("x{}", i)
        };
        parts.push(format!(
            "[{prev}][v{i}]xfade=transition={kind}:duration={d:.3}:offset={off:.3}[{out}]",
            prev = previous,
            i = i,
            kind = clips[i].transition.xfade_name(),
            d = overlap,
            off = offset,
            out = out
        ));
        previous = out;
    }
    parts.join(";")
}

/// Full filter graph for one batch of clips; inputs are numbered from zero.
pub fn batch_graph(clips: &[SceneClip], config: &CompositionConfig, effects: RenderEffects) -> String {
    let overlap = if effects.transitions {
        scene_transition_secs(clips, config)
    } else {
        0.0
    };

    let mut graph: Vec<String> = clips
        .iter()
        .enumerate()
        .map(|(i, clip)| scene_chain(i, clip, config, effects))
        .collect();
    graph.push(join_scenes(clips, overlap, effects.transitions));
    graph.join(";")
}

/// Encoder invocation rendering one batch into a silent clip.
pub fn batch_command(
    clips: &[SceneClip],
    config: &CompositionConfig,
    effects: RenderEffects,
    output: &Path,
) -> FfmpegCommand {
    let overlap = if effects.transitions {
        scene_transition_secs(clips, config)
    } else {
        0.0
    };
    let durations = input_durations(clips, overlap);

    let mut cmd = FfmpegCommand::new(output);
    for (clip, duration) in clips.iter().zip(durations) {
        cmd = match &clip.source {
            SceneSource::Image(path) => cmd.looped_image(path, duration, config.fps),
            SceneSource::Color(color) => {
                cmd.color_source(*color, config.width, config.height, config.fps, duration)
            }
        };
    }

    cmd.filter_complex(batch_graph(clips, config, effects))
        .map(format!("[{}]", VIDEO_OUT))
        .video_codec("libx264")
        .preset(config.preset.clone())
        .crf(config.crf)
        .output_args(["-r".to_string(), config.fps.to_string()])
        .output_args(["-pix_fmt", "yuv420p", "-max_muxing_queue_size", "1024"])
        .no_audio()
        .threads(config.threads)
}

/// Graph cross-fading rendered batches of the given timeline lengths.
///
/// Every batch but the last is padded with its final frame for `fade` seconds
/// so the joined video keeps the summed length.
pub fn batch_crossfade_graph(durations: &[f64], fade: f64) -> String {
    let n = durations.len();
    let last = n.saturating_sub(1);
    let mut parts: Vec<String> = (0..n)
        .map(|i| {
            if i < last {
                format!(
                    "[{i}:v]tpad=stop_mode=clone:stop_duration={f:.3},settb=AVTB,setpts=PTS-STARTPTS[b{i}]",
                    i = i,
                    f = fade
                )
            } else {
                format!("[{i}:v]settb=AVTB,setpts=PTS-STARTPTS[b{i}]", i = i)
            }
        })
        .collect();

    if n == 1 {
        parts.push(format!("[b0]null[{}]", VIDEO_OUT));
        return parts.join(";");
    }

    let mut previous = "b0".to_string();
    let mut offset = 0.0;
    for i in 1..n {
        offset += durations[i - 1];
        let out = if i == last {
            VIDEO_OUT.to_string()
        } else {
            format!("j{}", i)
        };
        parts.push(format!(
            "[{prev}][b{i}]xfade=transition=fade:duration={f:.3}:offset={off:.3}[{out}]",
            prev = previous,
            i = i,
            f = fade,
            off = offset,
            out = out
        ));
        previous = out;
    }
    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::TransitionKind;
    use std::path::PathBuf;

    fn clip(position: usize, duration: f64, image: bool) -> SceneClip {
        SceneClip {
            position,
            source: if image {
                SceneSource::Image(PathBuf::from(format!("/w/scene_{}.png", position)))
            } else {
                SceneSource::Color(0x646464)
            },
            duration,
            zoom: if position % 2 == 0 { Zoom::In } else { Zoom::Out },
            transition: TransitionKind::Fade,
        }
    }

    fn effects() -> RenderEffects {
        RenderEffects {
            ken_burns: true,
            transitions: true,
        }
    }

    #[test]
    fn test_image_chain_scales_and_zooms() {
        let config = CompositionConfig::default();
        let chain = scene_chain(0, &clip(0, 4.0, true), &config, effects());

        assert!(chain.starts_with("[0:v]scale=1920:1080:force_original_aspect_ratio=decrease"));
        assert!(chain.contains("pad=1920:1080:(ow-iw)/2:(oh-ih)/2:black"));
        assert!(chain.contains("zoompan=z='1+0.0500*on/120'"));
        assert!(chain.ends_with("setpts=PTS-STARTPTS[v0]"));
    }

    #[test]
    fn test_zoom_out_and_intensity_cap() {
        let mut config = CompositionConfig::default();
        config.ken_burns.intensity = 0.2;
        let chain = scene_chain(1, &clip(1, 2.0, true), &config, effects());
        assert!(chain.contains("zoompan=z='1.0800-0.0800*on/60'"));
    }

    #[test]
    fn test_color_fill_skips_scale() {
        let mut config = CompositionConfig::default();
        config.vignette.enabled = true;
        config.grain.enabled = true;
        let chain = scene_chain(2, &clip(2, 4.0, false), &config, effects());

        assert!(!chain.contains("scale="));
        assert!(!chain.contains("zoompan"));
        assert!(chain.contains("vignette=angle=0.4712"));
        assert!(chain.contains("noise=alls=2:allf=t"));
    }

    #[test]
    fn test_xfade_offsets_follow_scene_boundaries() {
        let config = CompositionConfig::default();
        let clips = vec![clip(0, 4.0, true), clip(1, 3.0, true), clip(2, 5.0, true)];
        let graph = batch_graph(&clips, &config, effects());

        assert!(graph.contains("[v0][v1]xfade=transition=fade:duration=0.300:offset=4.000[x1]"));
        assert!(graph.contains("[x1][v2]xfade=transition=fade:duration=0.300:offset=7.000[vout]"));
        assert_eq!(input_durations(&clips, 0.3), vec![4.3, 3.3, 5.0]);
    }

    #[test]
    fn test_concat_when_transitions_disabled() {
        let config = CompositionConfig::default();
        let clips = vec![clip(0, 4.0, true), clip(1, 3.0, false)];
        let graph = batch_graph(
            &clips,
            &config,
            RenderEffects {
                ken_burns: false,
                transitions: false,
            },
        );
        assert!(graph.ends_with("[v0][v1]concat=n=2:v=1:a=0[vout]"));
        assert!(!graph.contains("zoompan"));
    }

    #[test]
    fn test_effects_disabled_for_large_videos() {
        let config = CompositionConfig::default();
        let small = RenderEffects::for_scene_count(10, &config);
        assert!(small.ken_burns && small.transitions);

        let large = RenderEffects::for_scene_count(120, &config);
        assert!(!large.ken_burns);
        assert!(large.transitions);
    }

    #[test]
    fn test_batch_command_inputs() {
        let config = CompositionConfig::default();
        let clips = vec![clip(0, 4.0, true), clip(1, 3.0, false)];
        let cmd = batch_command(&clips, &config, effects(), Path::new("/w/batch_000.mp4"));
        let args = cmd.build_args();

        assert_eq!(cmd.input_count(), 2);
        assert!(args.contains(&"4.300".to_string()));
        assert!(args.contains(&"color=c=0x646464:s=1920x1080:r=30".to_string()));
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"[vout]".to_string()));
    }

    #[test]
    fn test_batch_crossfade_graph() {
        let graph = batch_crossfade_graph(&[40.0, 40.0, 12.0], 0.3);
        assert!(graph.contains("[0:v]tpad=stop_mode=clone:stop_duration=0.300"));
        assert!(graph.contains("[2:v]settb=AVTB,setpts=PTS-STARTPTS[b2]"));
        assert!(graph.contains("[b0][b1]xfade=transition=fade:duration=0.300:offset=40.000[j1]"));
        assert!(graph.ends_with("[j1][b2]xfade=transition=fade:duration=0.300:offset=80.000[vout]"));
    }
}
