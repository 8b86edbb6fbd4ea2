//! Background music from a mood-organized library, plus the prompt and
//! placement for a generated track.
//!
//! Layout: `<library>/<mood>/<track>.{mp3,wav}`. Mood directories may use the
//! Portuguese scene moods or their English names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reel_models::{GeneratedMusicConfig, MusicConfig, MusicCue, MusicMode, MusicSegment, SceneAnalysis};
use tracing::{debug, warn};

use super::MusicSelector;
use crate::error::WorkerResult;

/// Mood used when a mood has no tracks of its own.
pub const FALLBACK_MOOD: &str = "neutral";

/// Fade between two consecutive segments.
const CROSSFADE_MS: u64 = 1_500;

const TRACK_EXTENSIONS: [&str; 2] = ["mp3", "wav"];

/// English directory name for a scene mood.
fn mood_alias(mood: &str) -> Option<&'static str> {
    match mood {
        "alegre" => Some("happy"),
        "animado" => Some("energetic"),
        "calmo" => Some("calm"),
        "dramatico" => Some("dramatic"),
        "epico" => Some("epic"),
        "inspirador" => Some("inspiring"),
        "melancolico" => Some("sad"),
        "neutro" => Some("neutral"),
        "suspense" => Some("suspense"),
        _ => None,
    }
}

fn mood_description(mood: &str) -> &'static str {
    match mood_alias(mood).unwrap_or(mood) {
        "happy" => "happy cheerful music, bright and light",
        "energetic" => "upbeat energetic music, positive vibes",
        "calm" => "calm peaceful music, relaxing",
        "dramatic" => "dramatic intense music, building tension",
        "epic" => "epic orchestral music, cinematic",
        "inspiring" => "inspiring motivational music, uplifting",
        "sad" => "emotional melancholic music, heartfelt",
        "suspense" => "suspenseful music, tension building",
        "neutral" => "neutral background music, unobtrusive",
        _ => "background music",
    }
}

fn preset_description(preset: &str) -> Option<&'static str> {
    match preset {
        "corporate" => Some("professional corporate background music, upbeat, modern"),
        "cinematic_epic" => Some("epic cinematic orchestral music, dramatic, powerful"),
        "lofi_chill" => Some("lo-fi chill beats, relaxing, ambient"),
        "upbeat_pop" => Some("upbeat pop music, energetic, positive"),
        "ambient" => Some("ambient atmospheric music, soft, ethereal"),
        _ => None,
    }
}

/// Prompt for a track composed for this video, led by the predominant mood.
pub fn music_prompt(analysis: &SceneAnalysis, config: &GeneratedMusicConfig) -> String {
    let mood = predominant_mood(analysis);
    let mut parts: Vec<&str> = Vec::new();
    if let Some(preset) = config.preset.as_deref().and_then(preset_description) {
        parts.push(preset);
    }
    if let Some(style) = config.style_prompt.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(style);
    }
    parts.push(mood_description(&mood));
    if config.instrumental {
        parts.push("instrumental, no vocals");
    }
    parts.join(", ")
}

/// A generated track laid under the whole narration.
pub fn generated_segment(
    music_path: PathBuf,
    analysis: &SceneAnalysis,
    narration_ms: u64,
    config: &MusicConfig,
) -> MusicSegment {
    segment(music_path, (0, narration_ms, predominant_mood(analysis)), config, true, true)
}

/// Picks tracks for the narration from a directory tree.
#[derive(Debug, Clone)]
pub struct LibraryMusicSelector {
    library: PathBuf,
}

impl LibraryMusicSelector {
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self {
            library: library.into(),
        }
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    /// Tracks in `dir`, sorted by file name.
    async fn tracks_in(dir: &Path) -> Vec<PathBuf> {
        let mut tracks = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return tracks;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_track = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| TRACK_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_track && path.is_file() {
                tracks.push(path);
            }
        }
        tracks.sort();
        tracks
    }

    /// Mood sub-directories, sorted.
    async fn mood_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.library).await else {
            return dirs;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        dirs
    }

    /// Tracks for `mood`, falling back to its alias, then to `neutral`, then
    /// to the first mood directory that has any.
    async fn tracks_for(&self, mood: &str) -> Vec<PathBuf> {
        let mut candidates = vec![mood.to_string()];
        if let Some(alias) = mood_alias(mood) {
            candidates.push(alias.to_string());
        }
        candidates.push(FALLBACK_MOOD.to_string());

        for name in candidates {
            let tracks = Self::tracks_in(&self.library.join(&name)).await;
            if !tracks.is_empty() {
                return tracks;
            }
        }
        for dir in self.mood_dirs().await {
            let tracks = Self::tracks_in(&dir).await;
            if !tracks.is_empty() {
                return tracks;
            }
        }
        Vec::new()
    }

    async fn fixed_track(&self, config: &MusicConfig) -> Option<PathBuf> {
        match &config.track {
            Some(track) => {
                let path = self.library.join(track);
                if path.is_file() {
                    Some(path)
                } else {
                    warn!(track = %path.display(), "Configured music track not found");
                    None
                }
            }
            None => self.tracks_for(FALLBACK_MOOD).await.into_iter().next(),
        }
    }
}

#[async_trait]
impl MusicSelector for LibraryMusicSelector {
    async fn select(
        &self,
        analysis: &SceneAnalysis,
        narration_ms: u64,
        config: &MusicConfig,
    ) -> WorkerResult<Vec<MusicSegment>> {
        if config.mode != MusicMode::Library || narration_ms == 0 {
            return Ok(Vec::new());
        }

        if !config.auto_select_by_mood {
            let Some(path) = self.fixed_track(config).await else {
                return Ok(Vec::new());
            };
            let span = (0, narration_ms, reel_models::scene::DEFAULT_MOOD.to_string());
            return Ok(vec![segment(path, span, config, true, true)]);
        }

        let spans = cue_spans(&effective_cues(analysis), narration_ms);
        let mut segments = Vec::with_capacity(spans.len());
        let last = spans.len().saturating_sub(1);

        for (i, span) in spans.into_iter().enumerate() {
            let tracks = self.tracks_for(&span.2).await;
            if tracks.is_empty() {
                warn!(mood = %span.2, library = %self.library.display(), "No music tracks available");
                continue;
            }
            let path = tracks[i % tracks.len()].clone();
            debug!(mood = %span.2, track = %path.display(), "Selected music track");
            segments.push(segment(path, span, config, i == 0, i == last));
        }

        Ok(segments)
    }
}

fn segment(
    music_path: PathBuf,
    (start_ms, end_ms, mood): (u64, u64, String),
    config: &MusicConfig,
    first: bool,
    last: bool,
) -> MusicSegment {
    let half = end_ms.saturating_sub(start_ms) / 2;
    let fade_in = if first { config.fade_in_ms } else { CROSSFADE_MS };
    let fade_out = if last { config.fade_out_ms } else { CROSSFADE_MS };
    MusicSegment {
        music_path,
        mood,
        start_ms,
        end_ms,
        fade_in_ms: fade_in.min(half),
        fade_out_ms: fade_out.min(half),
        volume: config.volume,
    }
}

/// Cues from the analysis, or one cue with the predominant scene mood.
fn effective_cues(analysis: &SceneAnalysis) -> Vec<MusicCue> {
    if !analysis.music_cues.is_empty() {
        return analysis.music_cues.clone();
    }
    vec![MusicCue {
        mood: predominant_mood(analysis),
        start_ms: 0,
        end_ms: None,
    }]
}

/// Mood covering the most scene time; ties go to the earliest.
fn predominant_mood(analysis: &SceneAnalysis) -> String {
    let mut totals: HashMap<&str, u64> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for scene in &analysis.scenes {
        let mood = scene.mood.as_str();
        if !totals.contains_key(mood) {
            order.push(mood);
        }
        *totals.entry(mood).or_insert(0) += scene.duration_ms().max(1);
    }

    let mut best: Option<(&str, u64)> = None;
    for mood in order {
        let total = totals.get(mood).copied().unwrap_or(0);
        if best.map(|(_, t)| total > t).unwrap_or(true) {
            best = Some((mood, total));
        }
    }
    best.map(|(mood, _)| mood.to_string())
        .unwrap_or_else(|| reel_models::scene::DEFAULT_MOOD.to_string())
}

/// `(start, end, mood)` per cue: each ends at its own end, the next cue's
/// start or the narration end, whichever comes first.
fn cue_spans(cues: &[MusicCue], total_ms: u64) -> Vec<(u64, u64, String)> {
    let mut cues: Vec<&MusicCue> = cues.iter().filter(|c| c.start_ms < total_ms).collect();
    cues.sort_by_key(|c| c.start_ms);

    let mut spans = Vec::with_capacity(cues.len());
    for (i, cue) in cues.iter().enumerate() {
        let start = if i == 0 { 0 } else { cue.start_ms };
        let next_start = cues.get(i + 1).map(|c| c.start_ms).unwrap_or(total_ms);
        let end = cue.end_ms.unwrap_or(next_start).min(next_start).min(total_ms);
        if end > start {
            spans.push((start, end, cue.mood.clone()));
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::Scene;
    use tempfile::TempDir;

    fn library(layout: &[(&str, &[&str])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (mood, tracks) in layout {
            let mood_dir = dir.path().join(mood);
            std::fs::create_dir_all(&mood_dir).unwrap();
            for track in *tracks {
                std::fs::write(mood_dir.join(track), b"audio").unwrap();
            }
        }
        dir
    }

    fn library_config() -> MusicConfig {
        MusicConfig {
            mode: MusicMode::Library,
            fade_in_ms: 2_000,
            fade_out_ms: 3_000,
            ..MusicConfig::default()
        }
    }

    fn analysis(moods: &[(&str, u64)], cues: Vec<MusicCue>) -> SceneAnalysis {
        let mut start = 0;
        let scenes = moods
            .iter()
            .enumerate()
            .map(|(i, (mood, len))| {
                let mut scene = Scene::new(i, "x", start, start + len);
                scene.mood = mood.to_string();
                start += len;
                scene
            })
            .collect();
        SceneAnalysis {
            style_guide: String::new(),
            scenes,
            music_cues: cues,
        }
    }

    #[tokio::test]
    async fn test_mode_none_selects_nothing() {
        let lib = library(&[("neutral", &["a.mp3"])]);
        let selector = LibraryMusicSelector::new(lib.path());
        let segments = selector
            .select(&analysis(&[("neutro", 5_000)], vec![]), 5_000, &MusicConfig::default())
            .await
            .unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_predominant_mood_covers_narration() {
        let lib = library(&[("neutral", &["calm.mp3"]), ("dramatic", &["b.mp3", "a.wav", "notes.txt"])]);
        let selector = LibraryMusicSelector::new(lib.path());
        let scenes = analysis(&[("neutro", 2_000), ("dramatico", 6_000), ("neutro", 1_000)], vec![]);

        let segments = selector.select(&scenes, 9_000, &library_config()).await.unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].mood, "dramatico");
        assert!(segments[0].music_path.ends_with("dramatic/a.wav"));
        assert_eq!((segments[0].start_ms, segments[0].end_ms), (0, 9_000));
        assert_eq!(segments[0].fade_in_ms, 2_000);
        assert_eq!(segments[0].fade_out_ms, 3_000);
    }

    #[tokio::test]
    async fn test_cues_become_consecutive_segments() {
        let lib = library(&[("neutral", &["n.mp3"]), ("epico", &["e.mp3"])]);
        let selector = LibraryMusicSelector::new(lib.path());
        let cues = vec![
            MusicCue {
                mood: "epico".into(),
                start_ms: 4_000,
                end_ms: None,
            },
            MusicCue {
                mood: "calmo".into(),
                start_ms: 0,
                end_ms: Some(3_000),
            },
        ];

        let segments = selector
            .select(&analysis(&[], cues), 10_000, &library_config())
            .await
            .unwrap();

        assert_eq!(segments.len(), 2);
        // calm has no directory, falls back to neutral
        assert!(segments[0].music_path.ends_with("neutral/n.mp3"));
        assert_eq!((segments[0].start_ms, segments[0].end_ms), (0, 3_000));
        assert_eq!(segments[0].fade_out_ms, CROSSFADE_MS);
        assert!(segments[1].music_path.ends_with("epico/e.mp3"));
        assert_eq!((segments[1].start_ms, segments[1].end_ms), (4_000, 10_000));
        assert_eq!(segments[1].fade_in_ms, CROSSFADE_MS);
    }

    #[tokio::test]
    async fn test_fixed_track() {
        let lib = library(&[("neutral", &["theme.mp3"])]);
        let selector = LibraryMusicSelector::new(lib.path());
        let config = MusicConfig {
            auto_select_by_mood: false,
            track: Some(PathBuf::from("neutral/theme.mp3")),
            ..library_config()
        };

        let segments = selector
            .select(&analysis(&[("epico", 1_000)], vec![]), 1_000, &config)
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
        // fades limited to half the segment
        assert_eq!(segments[0].fade_in_ms, 500);
    }

    #[tokio::test]
    async fn test_empty_library() {
        let lib = TempDir::new().unwrap();
        let selector = LibraryMusicSelector::new(lib.path());
        let segments = selector
            .select(&analysis(&[("neutro", 1_000)], vec![]), 1_000, &library_config())
            .await
            .unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_music_prompt_from_mood_and_preset() {
        let scenes = analysis(&[("calmo", 1_000), ("epico", 4_000)], vec![]);
        let config = GeneratedMusicConfig {
            preset: Some("ambient".into()),
            style_prompt: Some(" piano ".into()),
            instrumental: true,
        };
        assert_eq!(
            music_prompt(&scenes, &config),
            "ambient atmospheric music, soft, ethereal, piano, epic orchestral music, cinematic, instrumental, no vocals"
        );

        let plain = GeneratedMusicConfig {
            preset: Some("unknown".into()),
            instrumental: false,
            ..GeneratedMusicConfig::default()
        };
        assert_eq!(music_prompt(&scenes, &plain), "epic orchestral music, cinematic");
    }

    #[test]
    fn test_generated_segment_spans_narration() {
        let scenes = analysis(&[("dramatico", 8_000)], vec![]);
        let segment = generated_segment(PathBuf::from("/w/music_generated.mp3"), &scenes, 8_000, &library_config());
        assert_eq!((segment.start_ms, segment.end_ms), (0, 8_000));
        assert_eq!(segment.mood, "dramatico");
        assert_eq!(segment.fade_in_ms, 2_000);
        assert_eq!(segment.fade_out_ms, 3_000);
    }

    #[tokio::test]
    async fn test_library_ignores_generated_mode() {
        let lib = library(&[("neutral", &["a.mp3"])]);
        let selector = LibraryMusicSelector::new(lib.path());
        let config = MusicConfig {
            mode: MusicMode::Generated,
            ..MusicConfig::default()
        };
        let segments = selector
            .select(&analysis(&[("neutro", 5_000)], vec![]), 5_000, &config)
            .await
            .unwrap();
        assert!(segments.is_empty());
    }
}
