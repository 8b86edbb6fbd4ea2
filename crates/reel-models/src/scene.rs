//! Scenes produced by scene analysis.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default mood when analysis did not assign one.
pub const DEFAULT_MOOD: &str = "neutro";

/// A time-bounded slice of the script mapped to one generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    /// Zero-based, contiguous index
    pub index: usize,

    pub text: String,

    pub start_ms: u64,

    pub end_ms: u64,

    /// Prompt sent to the image generator
    #[serde(default)]
    pub image_prompt: String,

    #[serde(default = "default_mood")]
    pub mood: String,

    #[serde(default = "default_mood_intensity")]
    pub mood_intensity: f64,
}

fn default_mood() -> String {
    DEFAULT_MOOD.to_string()
}

fn default_mood_intensity() -> f64 {
    0.5
}

impl Scene {
    pub fn new(index: usize, text: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            index,
            text: text.into(),
            start_ms,
            end_ms,
            image_prompt: String::new(),
            mood: default_mood(),
            mood_intensity: default_mood_intensity(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms() as f64 / 1000.0
    }
}

/// A mood change requested by scene analysis for the music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MusicCue {
    pub mood: String,
    pub start_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
}

/// Output of the scene analysis collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneAnalysis {
    /// Visual style shared by all image prompts
    #[serde(default)]
    pub style_guide: String,
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub music_cues: Vec<MusicCue>,
}

/// Put scenes into a finalized timeline.
///
/// Scenes are ordered by start time and re-indexed from zero. The first scene
/// starts at 0, every scene ends where the next one starts, and the last one
/// extends to `total_duration_ms` when that is later than its own end.
pub fn finalize_timeline(scenes: &mut Vec<Scene>, total_duration_ms: u64) {
    scenes.sort_by_key(|s| s.start_ms);

    if let Some(first) = scenes.first_mut() {
        first.start_ms = 0;
    }

    let starts: Vec<u64> = scenes.iter().map(|s| s.start_ms).collect();
    let count = scenes.len();
    for (i, scene) in scenes.iter_mut().enumerate() {
        scene.index = i;
        if i + 1 < count {
            scene.end_ms = starts[i + 1].max(scene.start_ms);
        } else {
            scene.end_ms = scene.end_ms.max(total_duration_ms).max(scene.start_ms);
        }
    }

    // zero-length scenes can appear when two scenes shared a start time
    scenes.retain(|s| s.duration_ms() > 0);
    for (i, scene) in scenes.iter_mut().enumerate() {
        scene.index = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_closes_gaps() {
        let mut scenes = vec![
            Scene::new(5, "b", 4_000, 7_500),
            Scene::new(2, "a", 300, 3_600),
            Scene::new(9, "c", 8_000, 11_000),
        ];
        finalize_timeline(&mut scenes, 12_000);

        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[0].text, "a");
        assert_eq!((scenes[0].start_ms, scenes[0].end_ms), (0, 4_000));
        assert_eq!((scenes[1].start_ms, scenes[1].end_ms), (4_000, 8_000));
        assert_eq!((scenes[2].start_ms, scenes[2].end_ms), (8_000, 12_000));
        assert_eq!(
            scenes.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_finalize_drops_empty_scenes() {
        let mut scenes = vec![
            Scene::new(0, "a", 0, 1_000),
            Scene::new(1, "b", 1_000, 1_000),
            Scene::new(2, "c", 1_000, 2_000),
        ];
        finalize_timeline(&mut scenes, 2_000);
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1].index, 1);
        assert_eq!(scenes.iter().map(|s| s.duration_ms()).sum::<u64>(), 2_000);
    }
}
