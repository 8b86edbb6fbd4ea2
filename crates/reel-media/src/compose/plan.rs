//! Pure planning for batched composition: durations, batches, colors, directions.

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

use reel_models::{
    CompositionConfig, GeneratedImage, Scene, SceneDurationConfig, SceneDurationMode,
    TransitionConfig, TransitionKind, ZoomDirection,
};

/// Longest cross-fade used between scenes inside a batch.
pub const MAX_SCENE_TRANSITION_SECS: f64 = 0.3;
/// Ken Burns zoom never exceeds this fraction.
pub const MAX_ZOOM_INTENSITY: f64 = 0.08;
/// Shortest scene rendered in auto mode.
const MIN_AUTO_SCENE_SECS: f64 = 1.0;
/// Fill color for moods missing from the table.
pub const DEFAULT_MOOD_COLOR: u32 = 0x646464;

/// Fill color used when a scene has no image.
pub fn mood_color(mood: &str) -> u32 {
    match mood.trim().to_lowercase().as_str() {
        "alegre" | "happy" | "joyful" => 0xFFDF80,
        "animado" | "energetic" | "upbeat" => 0xFFA54F,
        "calmo" | "calm" | "peaceful" => 0x87CEEB,
        "dramatico" | "dramatic" => 0x464664,
        "inspirador" | "inspiring" | "inspirational" => 0xFFD700,
        "melancolico" | "melancholic" | "sad" => 0x696987,
        "neutro" | "neutral" => 0x646464,
        "epico" | "epic" => 0x8B4513,
        "suspense" | "tense" => 0x2F2F3D,
        _ => DEFAULT_MOOD_COLOR,
    }
}

/// Rendered length of each scene in seconds.
pub fn scene_durations(scenes: &[Scene], config: &SceneDurationConfig) -> Vec<f64> {
    scenes
        .iter()
        .map(|scene| match config.mode {
            SceneDurationMode::Auto => scene.duration_secs().max(MIN_AUTO_SCENE_SECS),
            SceneDurationMode::Fixed => config.fixed_seconds,
            SceneDurationMode::Range => scene
                .duration_secs()
                .clamp(config.min_seconds, config.max_seconds),
        })
        .collect()
}

/// Split `count` scenes into consecutive batches of at most `batch_size`.
pub fn plan_batches(count: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..count)
        .step_by(size)
        .map(|start| start..(start + size).min(count))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zoom {
    In,
    Out,
}

/// Zoom direction for the scene at global position `index`.
pub fn zoom_for(index: usize, direction: ZoomDirection) -> Zoom {
    match direction {
        ZoomDirection::In => Zoom::In,
        ZoomDirection::Out => Zoom::Out,
        ZoomDirection::Alternate if index % 2 == 0 => Zoom::In,
        ZoomDirection::Alternate => Zoom::Out,
        // deterministic spread so re-renders match
        ZoomDirection::Random if index % 3 != 0 => Zoom::In,
        ZoomDirection::Random => Zoom::Out,
    }
}

/// Transition used to enter the scene at global position `index`.
pub fn transition_for(index: usize, config: &TransitionConfig) -> TransitionKind {
    if config.vary && !config.allowed.is_empty() {
        config.allowed[index % config.allowed.len()]
    } else {
        config.kind
    }
}

/// Where a scene's pixels come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneSource {
    Image(PathBuf),
    /// Solid fill, used when no genuine image exists
    Color(u32),
}

/// One scene ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneClip {
    /// Position in the whole video
    pub position: usize,
    pub source: SceneSource,
    /// Length on the timeline in seconds
    pub duration: f64,
    pub zoom: Zoom,
    pub transition: TransitionKind,
}

/// Pair scenes with their images and compute per-scene render settings.
pub fn build_clips(scenes: &[Scene], images: &[GeneratedImage], config: &CompositionConfig) -> Vec<SceneClip> {
    let by_index: HashMap<usize, &GeneratedImage> =
        images.iter().map(|img| (img.scene_index, img)).collect();
    let durations = scene_durations(scenes, &config.scene_duration);

    scenes
        .iter()
        .zip(durations)
        .enumerate()
        .map(|(position, (scene, duration))| {
            let source = by_index
                .get(&scene.index)
                .and_then(|img| img.usable_path())
                .filter(|path| path.exists())
                .map(|path| SceneSource::Image(path.to_path_buf()))
                .unwrap_or_else(|| SceneSource::Color(mood_color(&scene.mood)));

            SceneClip {
                position,
                source,
                duration,
                zoom: zoom_for(position, config.ken_burns.direction),
                transition: transition_for(position, &config.transition),
            }
        })
        .collect()
}

/// Encoder timeout for rendering `scene_count` scenes.
pub fn render_timeout_secs(scene_count: usize, config: &CompositionConfig) -> u64 {
    (scene_count as u64 * config.timeout_per_scene_secs).max(config.min_timeout_secs)
}

/// Encoder timeout for joining `batch_count` batches.
pub fn stitch_timeout_secs(batch_count: usize) -> u64 {
    (batch_count as u64 * 120).max(600)
}
