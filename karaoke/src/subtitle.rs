//! Karaoke subtitle formatting.
//!
//! Turns transcript segments into a styled subtitle document where every word
//! carries a `{\kNN}` directive, so the renderer highlights words one after
//! another across the segment's time span. Each line is accompanied by a
//! dimmed preview of the line that follows it. Title and artist go into a
//! separate document shown for the first few seconds.

use std::fmt::Write as _;
use std::path::Path;

use crate::config::{SubtitleConfig, SubtitleFormat};
use crate::types::TranscriptSegment;

pub const KARAOKE_STYLE: &str = "Karaoke";
pub const PREVIEW_STYLE: &str = "Preview";
pub const TITLE_STYLE: &str = "Title";

/// How long the title card stays on screen.
pub const TITLE_DURATION_MS: u64 = 5_000;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Numpad-style ASS alignment.
const ALIGN_BOTTOM_CENTER: u8 = 2;
const ALIGN_TOP_CENTER: u8 = 8;

/// Distance between the bottom of the frame and the preview line.
const PREVIEW_MARGIN_V: u32 = 40;
/// Gap between the preview line and the karaoke line above it.
const LINE_GAP: u32 = 24;
const SIDE_MARGIN: u32 = 40;

/// A named ASS style.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub name: String,
    pub font_name: String,
    pub font_size: u32,
    /// Fill colour of sung text (`&HAABBGGRR`).
    pub primary_color: String,
    /// Colour of text before its `\k` window starts.
    pub secondary_color: String,
    pub outline_color: String,
    pub bold: bool,
    pub outline: u32,
    pub alignment: u8,
    pub margin_l: u32,
    pub margin_r: u32,
    pub margin_v: u32,
}

/// One subtitle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueEvent {
    pub layer: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub style: String,
    pub margin_l: u32,
    pub margin_r: u32,
    pub margin_v: u32,
    pub text: String,
}

/// A complete subtitle file: styles plus ordered events.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleDocument {
    pub format: SubtitleFormat,
    pub play_res: (u32, u32),
    pub styles: Vec<Style>,
    pub events: Vec<DialogueEvent>,
}

impl SubtitleDocument {
    pub fn style(&self, name: &str) -> Option<&Style> {
        self.styles.iter().find(|s| s.name == name)
    }

    /// Events using the given style, in document order.
    pub fn events_with_style<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a DialogueEvent> + 'a {
        self.events.iter().filter(move |e| e.style == name)
    }

    /// Serialize in the document's own format.
    pub fn render(&self) -> String {
        match self.format {
            SubtitleFormat::Ass => self.to_ass(),
            SubtitleFormat::Srt => self.to_srt(),
        }
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }

    /// Format as Advanced SubStation Alpha.
    pub fn to_ass(&self) -> String {
        let mut out = String::new();
        out.push_str("[Script Info]\n");
        out.push_str("ScriptType: v4.00+\n");
        let _ = writeln!(out, "PlayResX: {}", self.play_res.0);
        let _ = writeln!(out, "PlayResY: {}", self.play_res.1);
        out.push_str("WrapStyle: 0\n");
        out.push_str("ScaledBorderAndShadow: yes\n\n");

        out.push_str("[V4+ Styles]\n");
        out.push_str(
            "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
             BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
             BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
        );
        for s in &self.styles {
            let _ = writeln!(
                out,
                "Style: {},{},{},{},{},{},&H80000000,{},0,0,0,100,100,0,0,1,{},0,{},{},{},{},1",
                s.name,
                s.font_name,
                s.font_size,
                s.primary_color,
                s.secondary_color,
                s.outline_color,
                if s.bold { -1 } else { 0 },
                s.outline,
                s.alignment,
                s.margin_l,
                s.margin_r,
                s.margin_v,
            );
        }

        out.push_str("\n[Events]\n");
        out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
        for e in &self.events {
            let _ = writeln!(
                out,
                "Dialogue: {},{},{},{},,{},{},{},,{}",
                e.layer,
                format_ass_time(e.start_ms),
                format_ass_time(e.end_ms),
                e.style,
                e.margin_l,
                e.margin_r,
                e.margin_v,
                ass_line(&e.text),
            );
        }
        out
    }

    /// Format as SRT subtitles.
    ///
    /// SRT has no style table. The first style is applied to the whole file
    /// by the compositor's `force_style`; events in any other style carry it
    /// inline as a `<font>` tag. Events whose style is not bottom-centred get
    /// an `{\anN}` tag. SRT renderers ignore `{\k}` timing, so it is dropped
    /// and lines are highlighted whole.
    pub fn to_srt(&self) -> String {
        let base = self.styles.first().map(|s| s.name.as_str());
        let mut out = String::new();
        for (i, e) in self.events.iter().enumerate() {
            let _ = writeln!(out, "{}", i + 1);
            let _ = writeln!(
                out,
                "{} --> {}",
                format_srt_time(e.start_ms),
                format_srt_time(e.end_ms)
            );
            let style = self.style(&e.style);
            if let Some(style) = style {
                if style.alignment != ALIGN_BOTTOM_CENTER {
                    let _ = write!(out, "{{\\an{}}}", style.alignment);
                }
            }
            let text = strip_karaoke_tags(&srt_block(&e.text));
            match style {
                Some(style) if base != Some(style.name.as_str()) => {
                    out.push_str(&font_tag(style, &text));
                }
                _ => out.push_str(&text),
            }
            out.push_str("\n\n");
        }
        out
    }
}

impl Style {
    /// The style as a `force_style` value for ffmpeg's `subtitles` filter.
    pub fn force_style(&self) -> String {
        format!(
            "FontName={},FontSize={},PrimaryColour={},SecondaryColour={},OutlineColour={},\
             Bold={},Outline={},Alignment={},MarginV={}",
            self.font_name,
            self.font_size,
            self.primary_color,
            self.secondary_color,
            self.outline_color,
            if self.bold { -1 } else { 0 },
            self.outline,
            self.alignment,
            self.margin_v,
        )
    }
}

/// Builds karaoke and title documents from one subtitle configuration.
#[derive(Debug, Clone, Copy)]
pub struct SubtitleFormatter<'a> {
    config: &'a SubtitleConfig,
    play_res: (u32, u32),
}

impl<'a> SubtitleFormatter<'a> {
    pub fn new(config: &'a SubtitleConfig, width: u32, height: u32) -> Self {
        Self {
            config,
            play_res: (width, height),
        }
    }

    /// The karaoke document: one timed event per segment plus a preview of
    /// the following segment.
    pub fn karaoke_document(&self, segments: &[TranscriptSegment]) -> SubtitleDocument {
        let mut events = Vec::with_capacity(segments.len() * 2);

        for (i, segment) in segments.iter().enumerate() {
            let start_ms = to_millis(segment.start);
            let end_ms = to_millis(segment.end).max(start_ms);

            events.push(DialogueEvent {
                layer: 0,
                start_ms,
                end_ms,
                style: KARAOKE_STYLE.to_string(),
                margin_l: 0,
                margin_r: 0,
                margin_v: 0,
                text: karaoke_text(&lyric_text(&segment.text), end_ms - start_ms),
            });

            if let Some(next) = segments.get(i + 1) {
                events.push(DialogueEvent {
                    layer: 0,
                    start_ms,
                    end_ms,
                    style: PREVIEW_STYLE.to_string(),
                    margin_l: 0,
                    margin_r: 0,
                    margin_v: 0,
                    text: lyric_text(&next.text).trim().to_string(),
                });
            }
        }

        SubtitleDocument {
            format: self.config.format,
            play_res: self.play_res,
            styles: vec![self.karaoke_style(), self.preview_style()],
            events,
        }
    }

    /// The title card: `"<title> - <artist>"` for the first five seconds.
    pub fn title_document(&self, title: Option<&str>, artist: Option<&str>) -> SubtitleDocument {
        let title = non_blank(title).unwrap_or(UNKNOWN_TITLE);
        let artist = non_blank(artist).unwrap_or(UNKNOWN_ARTIST);

        SubtitleDocument {
            format: self.config.format,
            play_res: self.play_res,
            styles: vec![self.title_style()],
            events: vec![DialogueEvent {
                layer: 0,
                start_ms: 0,
                end_ms: TITLE_DURATION_MS,
                style: TITLE_STYLE.to_string(),
                margin_l: 0,
                margin_r: 0,
                margin_v: 0,
                text: lyric_text(&format!("{title} - {artist}")),
            }],
        }
    }

    fn base_style(&self, name: &str, font_size: u32) -> Style {
        Style {
            name: name.to_string(),
            font_name: self.config.font_name.clone(),
            font_size,
            primary_color: self.config.base_color.clone(),
            secondary_color: self.config.base_color.clone(),
            outline_color: self.config.outline_color.clone(),
            bold: false,
            outline: 2,
            alignment: ALIGN_BOTTOM_CENTER,
            margin_l: SIDE_MARGIN,
            margin_r: SIDE_MARGIN,
            margin_v: PREVIEW_MARGIN_V,
        }
    }

    fn karaoke_style(&self) -> Style {
        Style {
            primary_color: self.config.highlight_color.clone(),
            secondary_color: self.config.base_color.clone(),
            bold: true,
            outline: 3,
            margin_v: PREVIEW_MARGIN_V + self.config.preview_font_size + LINE_GAP,
            ..self.base_style(KARAOKE_STYLE, self.config.karaoke_font_size)
        }
    }

    fn preview_style(&self) -> Style {
        Style {
            primary_color: self.config.preview_color.clone(),
            secondary_color: self.config.preview_color.clone(),
            outline: 1,
            ..self.base_style(PREVIEW_STYLE, self.config.preview_font_size)
        }
    }

    fn title_style(&self) -> Style {
        Style {
            bold: true,
            alignment: ALIGN_TOP_CENTER,
            ..self.base_style(TITLE_STYLE, self.config.title_font_size)
        }
    }

    /// `force_style` for the karaoke track in SRT mode.
    pub fn karaoke_force_style(&self) -> String {
        self.karaoke_style().force_style()
    }

    /// `force_style` for the title track in SRT mode.
    pub fn title_force_style(&self) -> String {
        self.title_style().force_style()
    }
}

/// Split `text` on whitespace and give every word an equal `\k` share of
/// `duration_ms`. Text without words is returned trimmed and untouched.
pub fn karaoke_text(text: &str, duration_ms: u64) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return text.trim().to_string();
    }

    let per_word = word_centiseconds(duration_ms, words.len());
    let mut out = String::with_capacity(text.len() + words.len() * 8);
    for word in &words {
        let _ = write!(out, "{{\\k{per_word}}}{word} ");
    }
    out.truncate(out.trim_end().len());
    out
}

/// Centiseconds allotted to each of `word_count` words. Truncates, so the sum
/// never exceeds the segment and falls short by less than `word_count`.
pub fn word_centiseconds(duration_ms: u64, word_count: usize) -> u64 {
    if word_count == 0 {
        return 0;
    }
    duration_ms / word_count as u64 / 10
}

/// ASS timestamp: `H:MM:SS.CC`.
pub fn format_ass_time(ms: u64) -> String {
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1_000;
    let cs = (ms % 1_000) / 10;
    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// SRT timestamp: `HH:MM:SS,mmm`.
pub fn format_srt_time(ms: u64) -> String {
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1_000;
    let ms = ms % 1_000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Seconds to whole milliseconds; negative and non-finite values clamp to 0.
fn to_millis(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Recognized text with override delimiters removed, so it can never open
/// an ASS tag block or escape sequence.
fn lyric_text(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '{' | '}' | '\\')).collect()
}

/// Remove `{\k..}` blocks.
fn strip_karaoke_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{\\k") {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => rest = &rest[start + end + 1..],
            None => rest = "",
        }
    }
    out.push_str(rest);
    out
}

/// Wrap SRT text in a `<font>` tag carrying the style's size and colour.
fn font_tag(style: &Style, text: &str) -> String {
    match html_color(&style.primary_color) {
        Some(color) => format!("<font size=\"{}\" color=\"{color}\">{text}</font>", style.font_size),
        None => format!("<font size=\"{}\">{text}</font>", style.font_size),
    }
}

/// `&HAABBGGRR` (or `&HBBGGRR`) to `#RRGGBB`.
fn html_color(ass: &str) -> Option<String> {
    let hex = ass
        .strip_prefix("&H")
        .or_else(|| ass.strip_prefix("&h"))?
        .trim_end_matches('&');
    if hex.len() < 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let bgr = &hex[hex.len() - 6..];
    Some(format!("#{}{}{}", &bgr[4..6], &bgr[2..4], &bgr[0..2]).to_ascii_uppercase())
}

/// Dialogue text must stay on one line; hard breaks become `\N`.
fn ass_line(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\\N")
}

/// A blank line ends an SRT entry, so drop empty lines inside the text.
fn srt_block(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
