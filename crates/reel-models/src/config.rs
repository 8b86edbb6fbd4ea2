//! Pipeline configuration.
//!
//! Every section carries documented defaults so a partial JSON document (or no
//! document at all) yields a runnable configuration. Numeric ranges are checked
//! with `validator` after loading.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::error::{ModelError, ModelResult};

/// Root configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Transcription language code, or "auto"
    pub language: String,

    #[validate(nested)]
    pub voice: VoiceConfig,

    #[validate(nested)]
    pub images: ImageConfig,

    #[validate(nested)]
    pub generation: GenerationConfig,

    #[validate(nested)]
    pub scenes: SceneConfig,

    #[validate(nested)]
    pub music: MusicConfig,

    #[validate(nested)]
    pub silence: SilenceConfig,

    #[validate(nested)]
    pub composition: CompositionConfig,

    #[validate(nested)]
    pub overlay: OverlayConfig,

    #[validate(nested)]
    pub subtitles: SubtitleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: "pt".to_string(),
            voice: VoiceConfig::default(),
            images: ImageConfig::default(),
            generation: GenerationConfig::default(),
            scenes: SceneConfig::default(),
            music: MusicConfig::default(),
            silence: SilenceConfig::default(),
            composition: CompositionConfig::default(),
            overlay: OverlayConfig::default(),
            subtitles: SubtitleConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::ConfigNotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.check()?;
        Ok(config)
    }

    /// Copy of this config with `overrides` merged in.
    ///
    /// `overrides` is a JSON object shaped like the config. Nested objects are
    /// merged key by key and every other value replaces the current one, so
    /// `{"images": {"style": "watercolor"}}` keeps the rest of `images`.
    pub fn with_overrides(&self, overrides: &Value) -> ModelResult<Self> {
        let Value::Object(sections) = overrides else {
            return Err(ModelError::InvalidConfig(
                "config override must be a JSON object".to_string(),
            ));
        };
        let mut merged = serde_json::to_value(self)?;
        if let Value::Object(current) = &merged {
            if let Some(unknown) = sections.keys().find(|key| !current.contains_key(*key)) {
                return Err(ModelError::InvalidConfig(format!(
                    "unknown config section in override: {}",
                    unknown
                )));
            }
        }
        merge_json(&mut merged, overrides);

        let config: PipelineConfig = serde_json::from_value(merged)?;
        config.check()?;
        Ok(config)
    }

    /// Run range validation plus the cross-field checks.
    pub fn check(&self) -> ModelResult<()> {
        self.validate()?;
        let durations = &self.composition.scene_duration;
        if durations.min_seconds > durations.max_seconds {
            return Err(ModelError::InvalidConfig(
                "scene_duration.min_seconds must not exceed max_seconds".to_string(),
            ));
        }
        if self.scenes.min_scene_seconds > self.scenes.max_scene_seconds {
            return Err(ModelError::InvalidConfig(
                "scenes.min_scene_seconds must not exceed max_scene_seconds".to_string(),
            ));
        }
        if self.overlay.enabled && self.overlay.effect_path.is_none() {
            return Err(ModelError::InvalidConfig(
                "overlay is enabled but no effect_path is set".to_string(),
            ));
        }
        Ok(())
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

// ============================================================================
// Generation services
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice_id: String,
    pub model_id: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub stability: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_boost: f64,
    /// Maximum characters per synthesized chunk
    #[validate(range(min = 100, max = 5000))]
    pub max_chunk_chars: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            model_id: "eleven_multilingual_v2".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            max_chunk_chars: 2500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct ImageConfig {
    pub model: String,
    #[validate(range(min = 64, max = 4096))]
    pub width: u32,
    #[validate(range(min = 64, max = 4096))]
    pub height: u32,
    /// Appended to every image prompt
    pub style: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            model: "flux-dev-ultra-fast".to_string(),
            width: 1920,
            height: 1080,
            style: "cinematic, dramatic lighting, 8k, hyperrealistic, professional photography"
                .to_string(),
        }
    }
}

/// Fan-out and retry settings shared by the audio and image stages.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct GenerationConfig {
    #[validate(range(min = 1, max = 32))]
    pub audio_concurrency: usize,
    #[validate(range(min = 1, max = 32))]
    pub image_concurrency: usize,
    /// Item count above which concurrency is halved
    #[validate(range(min = 1))]
    pub large_stage_threshold: usize,
    #[validate(nested)]
    pub retry: RetryPolicyConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            audio_concurrency: 3,
            image_concurrency: 5,
            large_stage_threshold: 100,
            retry: RetryPolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Attempts per item in the first and second pass
    #[validate(range(min = 1, max = 10))]
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub second_pass_cooldown_ms: u64,
    pub final_pass_cooldown_ms: u64,
    /// Attempts per item in the final pass
    #[validate(range(min = 1, max = 10))]
    pub final_pass_attempts: u32,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 4_000,
            max_delay_ms: 60_000,
            second_pass_cooldown_ms: 10_000,
            final_pass_cooldown_ms: 30_000,
            final_pass_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct SceneConfig {
    #[validate(range(min = 1, max = 10))]
    pub paragraphs_per_scene: usize,
    #[validate(range(min = 0.5, max = 60.0))]
    pub min_scene_seconds: f64,
    #[validate(range(min = 0.5, max = 120.0))]
    pub max_scene_seconds: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            paragraphs_per_scene: 2,
            min_scene_seconds: 3.0,
            max_scene_seconds: 6.0,
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MusicMode {
    #[default]
    None,
    Library,
    /// One track composed for the video by a music generation service
    #[serde(alias = "ai_generated")]
    Generated,
}

/// Prompt settings for generated music.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct GeneratedMusicConfig {
    /// Put in front of the mood description
    pub style_prompt: Option<String>,
    /// corporate, cinematic_epic, lofi_chill, upbeat_pop or ambient
    pub preset: Option<String>,
    pub instrumental: bool,
}

impl Default for GeneratedMusicConfig {
    fn default() -> Self {
        Self {
            style_prompt: None,
            preset: None,
            instrumental: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct MusicConfig {
    pub mode: MusicMode,
    /// Fixed track (relative to the library) used when mood selection is off
    pub track: Option<PathBuf>,
    pub auto_select_by_mood: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub volume: f64,
    pub ducking_enabled: bool,
    /// 0..1, higher values compress the music harder under narration
    #[validate(range(min = 0.0, max = 1.0))]
    pub ducking_intensity: f64,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    #[validate(nested)]
    pub generated: GeneratedMusicConfig,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            mode: MusicMode::None,
            track: None,
            auto_select_by_mood: true,
            volume: 0.08,
            ducking_enabled: true,
            ducking_intensity: 0.9,
            fade_in_ms: 1_000,
            fade_out_ms: 2_000,
            generated: GeneratedMusicConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct SilenceConfig {
    pub enabled: bool,
    #[validate(range(min = -90.0, max = 0.0))]
    pub threshold_db: f64,
    #[validate(range(min = 0.05, max = 10.0))]
    pub min_silence_seconds: f64,
    /// Silence kept at each cut boundary
    pub keep_margin_ms: u64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -40.0,
            min_silence_seconds: 0.5,
            keep_margin_ms: 200,
        }
    }
}

// ============================================================================
// Composition
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SceneDurationMode {
    /// Follow the narration timing
    #[default]
    Auto,
    Fixed,
    /// Narration timing clamped to [min, max]
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct SceneDurationConfig {
    pub mode: SceneDurationMode,
    #[validate(range(min = 0.5, max = 60.0))]
    pub fixed_seconds: f64,
    #[validate(range(min = 0.5, max = 60.0))]
    pub min_seconds: f64,
    #[validate(range(min = 0.5, max = 120.0))]
    pub max_seconds: f64,
}

impl Default for SceneDurationConfig {
    fn default() -> Self {
        Self {
            mode: SceneDurationMode::Auto,
            fixed_seconds: 4.0,
            min_seconds: 3.0,
            max_seconds: 6.0,
        }
    }
}

/// Cross-fade styles understood by the `xfade` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    None,
    #[default]
    Fade,
    Dissolve,
    WipeLeft,
    WipeRight,
    SlideUp,
    SlideDown,
    CircleOpen,
    CircleClose,
    Pixelize,
    Radial,
}

impl TransitionKind {
    /// Name of the `xfade` transition. `None` renders as a plain fade.
    pub fn xfade_name(&self) -> &'static str {
        match self {
            TransitionKind::None | TransitionKind::Fade => "fade",
            TransitionKind::Dissolve => "dissolve",
            TransitionKind::WipeLeft => "wipeleft",
            TransitionKind::WipeRight => "wiperight",
            TransitionKind::SlideUp => "slideup",
            TransitionKind::SlideDown => "slidedown",
            TransitionKind::CircleOpen => "circleopen",
            TransitionKind::CircleClose => "circleclose",
            TransitionKind::Pixelize => "pixelize",
            TransitionKind::Radial => "radial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct TransitionConfig {
    pub enabled: bool,
    pub kind: TransitionKind,
    #[validate(range(min = 0.1, max = 2.0))]
    pub duration_seconds: f64,
    /// Cycle through `allowed` instead of always using `kind`
    pub vary: bool,
    pub allowed: Vec<TransitionKind>,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: TransitionKind::Fade,
            duration_seconds: 0.5,
            vary: false,
            allowed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZoomDirection {
    In,
    Out,
    #[default]
    Alternate,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct KenBurnsConfig {
    pub enabled: bool,
    #[validate(range(min = 0.0, max = 0.2))]
    pub intensity: f64,
    pub direction: ZoomDirection,
}

impl Default for KenBurnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: 0.05,
            direction: ZoomDirection::Alternate,
        }
    }
}

/// An on/off effect with a strength.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct EffectToggle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_effect_intensity")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub intensity: f64,
}

fn default_effect_intensity() -> f64 {
    0.3
}

impl EffectToggle {
    pub fn disabled(intensity: f64) -> Self {
        Self {
            enabled: false,
            intensity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    #[default]
    Aac,
    Mp3,
}

impl AudioCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "libmp3lame",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct AudioOutputConfig {
    pub codec: AudioCodec,
    #[validate(range(min = 32, max = 512))]
    pub bitrate_kbps: u32,
    /// Apply EBU R128 loudness normalization in the final mux
    pub normalize: bool,
    #[validate(range(min = -70.0, max = -5.0))]
    pub target_lufs: f64,
}

impl Default for AudioOutputConfig {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Aac,
            bitrate_kbps: 192,
            normalize: true,
            target_lufs: -14.0,
        }
    }
}

/// Tuning thresholds for batched rendering.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct BatchingConfig {
    /// Scenes rendered per encoder invocation
    #[validate(range(min = 1, max = 100))]
    pub batch_size: usize,
    /// Above this many batches, joins use stream copy instead of cross-fades
    pub max_batches_for_crossfade: usize,
    #[validate(range(min = 0.0, max = 2.0))]
    pub batch_crossfade_seconds: f64,
    /// Ken Burns is switched off above this scene count
    pub max_scenes_for_ken_burns: usize,
    /// Transitions are switched off above this scene count
    pub max_scenes_for_transitions: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_batches_for_crossfade: 10,
            batch_crossfade_seconds: 0.3,
            max_scenes_for_ken_burns: 80,
            max_scenes_for_transitions: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct CompositionConfig {
    #[validate(range(min = 16, max = 7680))]
    pub width: u32,
    #[validate(range(min = 16, max = 4320))]
    pub height: u32,
    #[validate(range(min = 1, max = 120))]
    pub fps: u32,
    #[validate(range(min = 18, max = 28))]
    pub crf: u8,
    pub preset: String,
    #[validate(nested)]
    pub scene_duration: SceneDurationConfig,
    #[validate(nested)]
    pub transition: TransitionConfig,
    #[validate(nested)]
    pub ken_burns: KenBurnsConfig,
    #[validate(nested)]
    pub vignette: EffectToggle,
    #[validate(nested)]
    pub grain: EffectToggle,
    #[validate(nested)]
    pub audio: AudioOutputConfig,
    #[validate(nested)]
    pub batching: BatchingConfig,
    /// Encoder thread cap per process
    #[validate(range(min = 1, max = 64))]
    pub threads: u32,
    pub timeout_per_scene_secs: u64,
    pub min_timeout_secs: u64,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            crf: 23,
            preset: "medium".to_string(),
            scene_duration: SceneDurationConfig::default(),
            transition: TransitionConfig::default(),
            ken_burns: KenBurnsConfig::default(),
            vignette: EffectToggle::disabled(0.3),
            grain: EffectToggle::disabled(0.1),
            audio: AudioOutputConfig::default(),
            batching: BatchingConfig::default(),
            threads: 2,
            timeout_per_scene_secs: 45,
            min_timeout_secs: 450,
        }
    }
}

impl CompositionConfig {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

// ============================================================================
// Post-processing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Lighten,
    Screen,
    Overlay,
    Addition,
    Multiply,
    Softlight,
}

impl BlendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendMode::Lighten => "lighten",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Addition => "addition",
            BlendMode::Multiply => "multiply",
            BlendMode::Softlight => "softlight",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub effect_path: Option<PathBuf>,
    pub blend_mode: BlendMode,
    #[validate(range(min = 0.0, max = 1.0))]
    pub opacity: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            effect_path: None,
            blend_mode: BlendMode::Lighten,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    #[default]
    Bottom,
    Top,
    Middle,
}

impl SubtitlePosition {
    /// ASS numpad alignment.
    pub fn alignment(&self) -> u8 {
        match self {
            SubtitlePosition::Bottom => 2,
            SubtitlePosition::Top => 8,
            SubtitlePosition::Middle => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleColor {
    White,
    Black,
    Yellow,
    Red,
    Green,
    Blue,
    Cyan,
    Magenta,
}

impl SubtitleColor {
    /// Colour in ASS `&HAABBGGRR` notation.
    pub fn ass(&self) -> &'static str {
        match self {
            SubtitleColor::White => "&H00FFFFFF",
            SubtitleColor::Black => "&H00000000",
            SubtitleColor::Yellow => "&H0000FFFF",
            SubtitleColor::Red => "&H000000FF",
            SubtitleColor::Green => "&H0000FF00",
            SubtitleColor::Blue => "&H00FF0000",
            SubtitleColor::Cyan => "&H00FFFF00",
            SubtitleColor::Magenta => "&H00FF00FF",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct SubtitleConfig {
    pub enabled: bool,
    pub font_name: String,
    #[validate(range(min = 8, max = 200))]
    pub font_size: u32,
    pub color: SubtitleColor,
    pub outline_color: SubtitleColor,
    #[validate(range(max = 20))]
    pub outline_width: u32,
    pub margin_v: u32,
    pub position: SubtitlePosition,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            font_name: "Arial".to_string(),
            font_size: 48,
            color: SubtitleColor::White,
            outline_color: SubtitleColor::Black,
            outline_width: 3,
            margin_v: 50,
            position: SubtitlePosition::Bottom,
        }
    }
}
