//! Burned-in subtitles from the narration transcript.

use std::fmt::Write as _;
use std::path::Path;

use reel_models::{SubtitleConfig, SubtitlePosition, Transcription, Word};
use tracing::{info, warn};

use super::{release_input, video_geometry, PostProcessed, PostProcessor};
use crate::command::{escape_filter_path, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_output, remove_temp_file};
use crate::probe::get_duration;

pub const SUBTITLED_VIDEO_FILE: &str = "video_with_subtitles.mp4";

const ASS_FILE: &str = "subtitles.ass";
const SRT_FILE: &str = "subtitles.srt";
const MAX_CUE_WORDS: usize = 8;
const MAX_CUE_MS: u64 = 4_000;

/// One on-screen subtitle.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Split transcript segments into short cues.
///
/// Segments with word timings are cut every `MAX_CUE_WORDS` words or
/// `MAX_CUE_MS`; segments without words become one cue each.
pub fn build_cues(transcription: &Transcription) -> Vec<Cue> {
    let mut cues = Vec::new();
    for segment in &transcription.segments {
        if segment.text.trim().is_empty() {
            continue;
        }
        if segment.words.is_empty() {
            cues.push(Cue {
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
                text: segment.text.trim().to_string(),
            });
            continue;
        }

        let mut current: Vec<&Word> = Vec::new();
        for word in &segment.words {
            let too_long = current
                .first()
                .map(|first| word.end_ms.saturating_sub(first.start_ms) > MAX_CUE_MS)
                .unwrap_or(false);
            if current.len() >= MAX_CUE_WORDS || too_long {
                cues.push(cue_from(&current));
                current.clear();
            }
            current.push(word);
        }
        if !current.is_empty() {
            cues.push(cue_from(&current));
        }
    }
    cues
}

fn cue_from(words: &[&Word]) -> Cue {
    Cue {
        start_ms: words.first().map(|w| w.start_ms).unwrap_or(0),
        end_ms: words.last().map(|w| w.end_ms).unwrap_or(0),
        text: words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" "),
    }
}

/// `H:MM:SS.cc`
pub fn format_ass_time(ms: u64) -> String {
    let cs = ms / 10;
    format!(
        "{}:{:02}:{:02}.{:02}",
        cs / 360_000,
        (cs / 6_000) % 60,
        (cs / 100) % 60,
        cs % 100
    )
}

/// `HH:MM:SS,mmm`
pub fn format_srt_time(ms: u64) -> String {
    format!(
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1_000) % 60,
        ms % 1_000
    )
}

fn scaled_font_size(base: u32, height: u32) -> u32 {
    if height < 720 {
        (base as f64 * 0.7) as u32
    } else if height > 1080 {
        (base as f64 * 1.2) as u32
    } else {
        base
    }
}

fn margin_v(config: &SubtitleConfig) -> u32 {
    match config.position {
        SubtitlePosition::Middle => 0,
        _ => config.margin_v,
    }
}

fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('\n', "\\N")
}

/// Full ASS document for `cues` on a `width`x`height` frame.
pub fn render_ass(cues: &[Cue], config: &SubtitleConfig, width: u32, height: u32) -> String {
    let mut doc = format!(
        "[Script Info]\n\
         Title: Narration\n\
         ScriptType: v4.00+\n\
         PlayResX: {width}\n\
         PlayResY: {height}\n\
         ScaledBorderAndShadow: yes\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, \
         Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, \
         Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: Default,{font},{size},{primary},&H000000FF,{outline},&H80000000,-1,0,0,0,100,100,0,0,1,\
         {outline_width},1,{alignment},20,20,{margin},1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        width = width,
        height = height,
        font = config.font_name,
        size = scaled_font_size(config.font_size, height),
        primary = config.color.ass(),
        outline = config.outline_color.ass(),
        outline_width = config.outline_width,
        alignment = config.position.alignment(),
        margin = margin_v(config),
    );

    for cue in cues {
        let _ = writeln!(
            doc,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            format_ass_time(cue.start_ms),
            format_ass_time(cue.end_ms),
            escape_ass_text(&cue.text)
        );
    }
    doc
}

/// Numbered SRT document for `cues`.
pub fn render_srt(cues: &[Cue]) -> String {
    let mut doc = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = write!(
            doc,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(cue.start_ms),
            format_srt_time(cue.end_ms),
            cue.text
        );
    }
    doc
}

fn force_style(config: &SubtitleConfig) -> String {
    format!(
        "FontName={},FontSize={},PrimaryColour={},OutlineColour={},Outline={},Alignment={},MarginV={}",
        config.font_name,
        config.font_size,
        config.color.ass(),
        config.outline_color.ass(),
        config.outline_width,
        config.position.alignment(),
        margin_v(config)
    )
}

impl PostProcessor {
    /// Burn the transcript into `input` as styled subtitles.
    ///
    /// ASS rendering is tried first; if the encoder rejects it, an SRT file is
    /// burned with `force_style` instead.
    pub async fn burn_subtitles(
        &self,
        input: &Path,
        transcription: &Transcription,
        config: &SubtitleConfig,
        fallback_size: (u32, u32),
        work_dir: &Path,
    ) -> MediaResult<PostProcessed> {
        let cues = build_cues(transcription);
        if cues.is_empty() {
            return Err(MediaError::empty_input("transcript has no text to subtitle"));
        }

        let (width, height, video_secs) = video_geometry(input, fallback_size).await;
        let output = work_dir.join(SUBTITLED_VIDEO_FILE);
        info!(cues = cues.len(), position = ?config.position, "Burning subtitles");

        let ass_path = work_dir.join(ASS_FILE);
        tokio::fs::write(&ass_path, render_ass(&cues, config, width, height)).await?;
        let ass = subtitle_command(input, &output, format!("ass='{}'", escape_filter_path(&ass_path)));
        let first = self.runner("subtitles_ass", work_dir).run(&ass).await;
        remove_temp_file(&ass_path).await;

        if let Err(e) = first {
            warn!("ASS subtitles failed, retrying with SRT: {}", e);
            let srt_path = work_dir.join(SRT_FILE);
            tokio::fs::write(&srt_path, render_srt(&cues)).await?;
            let srt = subtitle_command(
                input,
                &output,
                format!(
                    "subtitles='{}':force_style='{}'",
                    escape_filter_path(&srt_path),
                    force_style(config)
                ),
            );
            let second = self.runner("subtitles_srt", work_dir).run(&srt).await;
            remove_temp_file(&srt_path).await;
            second?;
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

fn subtitle_command(input: &Path, output: &Path, filter: String) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(input)
        .video_filter(filter)
        .video_codec("libx264")
        .preset("fast")
        .crf(18)
        .audio_codec("copy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{SubtitleColor, TranscriptSegment};

    fn word(text: &str, start_ms: u64, end_ms: u64) -> Word {
        Word {
            text: text.to_string(),
            start_ms,
            end_ms,
            confidence: 0.9,
        }
    }

    fn transcription(segments: Vec<TranscriptSegment>) -> Transcription {
        Transcription {
            segments,
            ..Transcription::default()
        }
    }

    #[test]
    fn test_time_formats() {
        assert_eq!(format_ass_time(0), "0:00:00.00");
        assert_eq!(format_ass_time(3_723_450), "1:02:03.45");
        assert_eq!(format_srt_time(3_723_456), "01:02:03,456");
    }

    #[test]
    fn test_long_segments_split_into_cues() {
        let words: Vec<Word> = (0..10)
            .map(|i| word(&format!("w{}", i), i * 300, i * 300 + 250))
            .collect();
        let segment = TranscriptSegment {
            text: "ten words".into(),
            start_ms: 0,
            end_ms: 2_950,
            words,
        };
        let cues = build_cues(&transcription(vec![segment]));

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "w0 w1 w2 w3 w4 w5 w6 w7");
        assert_eq!(cues[1].start_ms, 2_400);
        assert_eq!(cues[1].end_ms, 2_950);
    }

    #[test]
    fn test_segment_without_words_is_one_cue() {
        let segment = TranscriptSegment {
            text: " Olá mundo ".into(),
            start_ms: 100,
            end_ms: 900,
            words: Vec::new(),
        };
        let cues = build_cues(&transcription(vec![segment]));
        assert_eq!(
            cues,
            vec![Cue {
                start_ms: 100,
                end_ms: 900,
                text: "Olá mundo".into()
            }]
        );
    }

    #[test]
    fn test_ass_document_styles_and_escapes() {
        let config = SubtitleConfig {
            color: SubtitleColor::Yellow,
            position: SubtitlePosition::Middle,
            ..SubtitleConfig::default()
        };
        let cues = vec![Cue {
            start_ms: 0,
            end_ms: 1_500,
            text: "a {b}\nc".into(),
        }];
        let doc = render_ass(&cues, &config, 1280, 640);

        assert!(doc.contains("PlayResX: 1280"));
        // 48 * 0.7 below 720p, middle alignment drops the vertical margin
        assert!(doc.contains("Style: Default,Arial,33,&H0000FFFF,&H000000FF,&H00000000"));
        assert!(doc.contains(",3,1,5,20,20,0,1\n"));
        assert!(doc.contains("Dialogue: 0,0:00:00.00,0:00:01.50,Default,,0,0,0,,a \\{b\\}\\Nc"));
    }

    #[test]
    fn test_font_scales_up_above_1080p() {
        assert_eq!(scaled_font_size(50, 2160), 60);
        assert_eq!(scaled_font_size(50, 1080), 50);
    }

    #[test]
    fn test_srt_document() {
        let cues = vec![
            Cue { start_ms: 0, end_ms: 1_000, text: "one".into() },
            Cue { start_ms: 1_000, end_ms: 2_500, text: "two".into() },
        ];
        assert_eq!(
            render_srt(&cues),
            "1\n00:00:00,000 --> 00:00:01,000\none\n\n2\n00:00:01,000 --> 00:00:02,500\ntwo\n\n"
        );
        assert!(force_style(&SubtitleConfig::default()).ends_with("Alignment=2,MarginV=50"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = PostProcessor::new()
            .burn_subtitles(
                &dir.path().join("composed.mp4"),
                &Transcription::default(),
                &SubtitleConfig::default(),
                (1920, 1080),
                dir.path(),
            )
            .await;
        assert!(matches!(result, Err(MediaError::EmptyInput(_))));
    }
}
