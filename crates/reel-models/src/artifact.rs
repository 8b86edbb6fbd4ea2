//! Work items and the artifacts generated from them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Anything that carries a stable position in its source list.
pub trait Indexed {
    fn index(&self) -> usize;
}

/// A bounded-length slice of script text sent to speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

impl TextChunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

impl Indexed for TextChunk {
    fn index(&self) -> usize {
        self.index
    }
}

impl Indexed for crate::Scene {
    fn index(&self) -> usize {
        self.index
    }
}

/// Synthesized narration for one text chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioChunk {
    pub index: usize,

    /// Empty path marks a chunk with no audio at all
    pub path: PathBuf,

    pub duration_ms: u64,

    pub text: String,

    #[serde(default)]
    pub generation_time_ms: u64,

    /// True when the audio is synthesized silence standing in for a failed chunk
    #[serde(default)]
    pub placeholder: bool,
}

impl AudioChunk {
    pub fn is_missing(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

impl Indexed for AudioChunk {
    fn index(&self) -> usize {
        self.index
    }
}

/// Image generated for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedImage {
    pub scene_index: usize,

    /// Empty for placeholders
    pub path: PathBuf,

    pub prompt_used: String,

    #[serde(default)]
    pub generation_time_ms: u64,

    /// True when no genuine model output exists for this scene
    #[serde(default)]
    pub placeholder: bool,
}

impl GeneratedImage {
    pub fn placeholder(scene_index: usize, prompt: impl Into<String>) -> Self {
        Self {
            scene_index,
            path: PathBuf::new(),
            prompt_used: prompt.into(),
            generation_time_ms: 0,
            placeholder: true,
        }
    }

    /// Path of a usable image file, if any.
    pub fn usable_path(&self) -> Option<&Path> {
        if self.placeholder || self.path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.path)
        }
    }
}

impl Indexed for GeneratedImage {
    fn index(&self) -> usize {
        self.scene_index
    }
}

/// A music track placed on the narration timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MusicSegment {
    pub music_path: PathBuf,
    pub mood: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    /// Linear gain applied to the track
    pub volume: f64,
}

impl MusicSegment {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergedAudio {
    pub path: PathBuf,
    /// Sum of the merged chunk durations
    pub duration_ms: u64,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SilenceRemoval {
    pub path: PathBuf,
    pub original_duration_ms: u64,
    pub new_duration_ms: u64,
    pub silences_removed: usize,
    pub time_saved_ms: u64,
}

impl SilenceRemoval {
    /// Result for a file that was left untouched.
    pub fn unchanged(path: PathBuf, duration_ms: u64) -> Self {
        Self {
            path,
            original_duration_ms: duration_ms,
            new_duration_ms: duration_ms,
            silences_removed: 0,
            time_saved_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MixedAudio {
    pub path: PathBuf,
    pub duration_ms: u64,
    /// Whether any music made it into the mix
    pub has_music: bool,
}

/// Terminal output of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoResult {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub scenes_count: usize,
    /// "WxH"
    pub resolution: String,
    pub file_size_bytes: u64,
}
