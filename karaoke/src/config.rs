use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A validated language for whisper transcription.
///
/// Wraps a language code that has been verified against whisper.cpp's
/// supported language list. Accepts both short codes ("en", "pt") and full
/// names ("english", "portuguese").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Language {
    /// Auto-detect language from audio.
    Auto,
    /// A validated language code (e.g. "en", "pt", "ja").
    Code {
        /// Short code as whisper expects it.
        code: String,
        /// Whisper internal language ID.
        id: i32,
    },
}

impl Language {
    /// Create a language from a code or full name, validating against whisper.cpp.
    pub fn new(lang: &str) -> Result<Self> {
        let lower = lang.trim().to_lowercase();
        if lower == "auto" {
            return Ok(Language::Auto);
        }

        match whisper_rs::get_lang_id(&lower) {
            Some(id) => {
                let code = whisper_rs::get_lang_str(id).unwrap_or(&lower).to_string();
                Ok(Language::Code { code, id })
            }
            None => Err(Error::UnsupportedLanguage(lang.to_string())),
        }
    }

    /// Get the short language code (e.g. "en"), or None for Auto.
    pub fn code(&self) -> Option<&str> {
        match self {
            Language::Auto => None,
            Language::Code { code, .. } => Some(code),
        }
    }

    /// List all supported languages as (code, full_name) pairs.
    pub fn supported() -> Vec<(&'static str, &'static str)> {
        let max = whisper_rs::get_lang_max_id();
        (0..=max)
            .filter_map(|id| {
                let code = whisper_rs::get_lang_str(id)?;
                let name = whisper_rs::get_lang_str_full(id)?;
                Some((code, name))
            })
            .collect()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Auto => write!(f, "auto"),
            Language::Code { code, .. } => write!(f, "{code}"),
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Auto
    }
}

/// Whisper model sizes, smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    #[serde(rename = "tiny")]
    Tiny,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "small")]
    Small,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "large-v2")]
    LargeV2,
    #[serde(rename = "large-v3")]
    LargeV3,
    #[serde(rename = "large-v3-turbo")]
    LargeV3Turbo,
}

impl ModelTier {
    pub const ALL: [ModelTier; 7] = [
        ModelTier::Tiny,
        ModelTier::Base,
        ModelTier::Small,
        ModelTier::Medium,
        ModelTier::LargeV2,
        ModelTier::LargeV3,
        ModelTier::LargeV3Turbo,
    ];

    /// Human-readable name, also the middle part of the model filename.
    pub fn name(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "tiny",
            ModelTier::Base => "base",
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::LargeV2 => "large-v2",
            ModelTier::LargeV3 => "large-v3",
            ModelTier::LargeV3Turbo => "large-v3-turbo",
        }
    }

    /// Model filename as used by whisper.cpp, optionally language-suffixed
    /// (`ggml-base.en.bin`).
    pub fn filename(&self, language: Option<&str>) -> String {
        match language {
            Some(code) => format!("ggml-{}.{code}.bin", self.name()),
            None => format!("ggml-{}.bin", self.name()),
        }
    }

    /// Approximate download size.
    pub fn size_hint(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "75 MB",
            ModelTier::Base => "142 MB",
            ModelTier::Small => "466 MB",
            ModelTier::Medium => "1.5 GB",
            ModelTier::LargeV2 | ModelTier::LargeV3 => "2.9 GB",
            ModelTier::LargeV3Turbo => "~1.6 GB",
        }
    }

    /// Parse from string (e.g. CLI argument).
    pub fn parse_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.name() == s)
    }
}

/// Which vocal separation strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeparationStrategy {
    /// Phase cancellation of centre-panned content with ffmpeg. No model needed.
    SpectralCancellation,
    /// External stem separator (demucs-compatible command line).
    SourceSeparation,
}

/// Subtitle document flavour handed to the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    /// Advanced SubStation Alpha, with styles and `{\k}` karaoke timing.
    Ass,
    /// SubRip; styles come from the compositor's `force_style` and inline
    /// `<font>` tags. Lines are highlighted whole, without per-word timing.
    Srt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Ass => ".ass",
            SubtitleFormat::Srt => ".srt",
        }
    }
}

/// Video background behind the lyrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Background {
    /// Flat colour field (ffmpeg colour name or `0xRRGGBB`).
    Solid { color: String },
    /// Audio waveform animation.
    Waveform { color: String },
    /// Still image looped for the length of the audio.
    Image { path: PathBuf },
}

impl Default for Background {
    fn default() -> Self {
        Background::Solid {
            color: "black".to_string(),
        }
    }
}

/// Paths of the external programs the pipeline drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub demucs: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            demucs: PathBuf::from("demucs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    pub strategy: SeparationStrategy,
    /// Stem separator model name (`-n`), also the name of its output subdirectory.
    pub model: String,
    /// Fall back to spectral cancellation if the stem separator fails.
    pub fallback_to_spectral: bool,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            strategy: SeparationStrategy::SpectralCancellation,
            model: "htdemucs".to_string(),
            fallback_to_spectral: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Directory holding `ggml-*.bin` model files.
    pub model_dir: Option<PathBuf>,
    /// Explicit model file; skips the tier search.
    pub model_file: Option<PathBuf>,
    /// Preferred (higher accuracy) model.
    pub preferred_model: ModelTier,
    /// Baseline model used when the preferred one is absent.
    pub fallback_model: ModelTier,
    /// Pass a lyric-style prompt to the recognizer.
    pub lyric_prompt: bool,
    pub gpu: bool,
    pub n_threads: Option<u32>,
    pub beam_size: Option<u32>,
    pub temperature: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_file: None,
            preferred_model: ModelTier::Medium,
            fallback_model: ModelTier::Base,
            lyric_prompt: true,
            gpu: true,
            n_threads: None,
            beam_size: None,
            temperature: 0.0,
        }
    }
}

impl TranscriptionConfig {
    /// Resolve the model directory, defaulting to ~/.cache/karaoke/models.
    pub fn resolve_model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(default_model_dir)
    }
}

/// Default model directory: `<cache>/karaoke/models`.
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("karaoke")
        .join("models")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub format: SubtitleFormat,
    pub font_name: String,
    pub karaoke_font_size: u32,
    pub preview_font_size: u32,
    pub title_font_size: u32,
    /// Colour of sung words, `&HAABBGGRR` as ASS expects.
    pub highlight_color: String,
    /// Colour of words not yet sung.
    pub base_color: String,
    pub preview_color: String,
    pub outline_color: String,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            format: SubtitleFormat::Ass,
            font_name: "Arial".to_string(),
            karaoke_font_size: 56,
            preview_font_size: 36,
            title_font_size: 48,
            highlight_color: "&H0000D7FF".to_string(),
            base_color: "&H00FFFFFF".to_string(),
            preview_color: "&H00A0A0A0".to_string(),
            outline_color: "&H00000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub background: Background,
    pub codec: String,
    pub bitrate: String,
    pub preset: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 25,
            background: Background::default(),
            codec: "libx264".to_string(),
            bitrate: "2M".to_string(),
            preset: "fast".to_string(),
        }
    }
}

/// Process-wide pipeline configuration.
///
/// Built once at start-up (defaults, optional TOML file, then command line
/// overrides) and shared read-only by every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KaraokeConfig {
    /// Where uploads and every intermediate artifact live.
    pub work_dir: PathBuf,
    pub tools: ToolPaths,
    /// Upper bound for any single external tool invocation, in seconds.
    pub tool_timeout_secs: u64,
    /// Language used when a request does not name one.
    pub default_language: String,
    pub separation: SeparationConfig,
    pub transcription: TranscriptionConfig,
    pub subtitles: SubtitleConfig,
    pub video: VideoConfig,
}

impl Default for KaraokeConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("karaoke"),
            tools: ToolPaths::default(),
            tool_timeout_secs: 30 * 60,
            default_language: "auto".to_string(),
            separation: SeparationConfig::default(),
            transcription: TranscriptionConfig::default(),
            subtitles: SubtitleConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl KaraokeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML config file, or the defaults when no path is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file '{}' does not exist",
                        path.display()
                    )));
                }
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(Error::Config(format!(
                "video size must be non-zero, got {}x{}",
                self.video.width, self.video.height
            )));
        }
        if self.video.width % 2 != 0 || self.video.height % 2 != 0 {
            return Err(Error::Config(format!(
                "video size must be even for yuv420p, got {}x{}",
                self.video.width, self.video.height
            )));
        }
        if self.video.fps == 0 {
            return Err(Error::Config("video fps must be non-zero".into()));
        }
        if self.tool_timeout_secs == 0 {
            return Err(Error::Config("tool_timeout_secs must be non-zero".into()));
        }
        let sizes = [
            self.subtitles.karaoke_font_size,
            self.subtitles.preview_font_size,
            self.subtitles.title_font_size,
        ];
        if sizes.contains(&0) {
            return Err(Error::Config("font sizes must be non-zero".into()));
        }
        Language::new(&self.default_language)
            .map_err(|_| Error::Config(format!("unknown default_language \"{}\"", self.default_language)))?;
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = dir;
        self
    }

    pub fn separation_strategy(mut self, strategy: SeparationStrategy) -> Self {
        self.separation.strategy = strategy;
        self
    }

    pub fn model_dir(mut self, dir: PathBuf) -> Self {
        self.transcription.model_dir = Some(dir);
        self
    }

    pub fn subtitle_format(mut self, format: SubtitleFormat) -> Self {
        self.subtitles.format = format;
        self
    }

    pub fn background(mut self, background: Background) -> Self {
        self.video.background = background;
        self
    }

    pub fn video_size(mut self, width: u32, height: u32) -> Self {
        self.video.width = width;
        self.video.height = height;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_auto() {
        assert_eq!(Language::new("auto").unwrap(), Language::Auto);
        assert_eq!(Language::new("AUTO").unwrap().code(), None);
    }

    #[test]
    fn test_language_code_and_full_name() {
        let en = Language::new("en").unwrap();
        assert_eq!(en.code(), Some("en"));
        let pt = Language::new("portuguese").unwrap();
        assert_eq!(pt.code(), Some("pt"));
        assert_eq!(pt.to_string(), "pt");
    }

    #[test]
    fn test_language_unknown() {
        assert!(matches!(
            Language::new("klingon"),
            Err(Error::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_model_tier_filenames() {
        assert_eq!(ModelTier::Base.filename(None), "ggml-base.bin");
        assert_eq!(ModelTier::Base.filename(Some("en")), "ggml-base.en.bin");
        assert_eq!(
            ModelTier::LargeV3Turbo.filename(None),
            "ggml-large-v3-turbo.bin"
        );
    }

    #[test]
    fn test_model_tier_parse_name() {
        for tier in ModelTier::ALL {
            assert_eq!(ModelTier::parse_name(tier.name()), Some(tier));
        }
        assert_eq!(ModelTier::parse_name("huge"), None);
    }

    #[test]
    fn test_default_config_is_valid() {
        KaraokeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_from_toml_partial() {
        let config = KaraokeConfig::from_toml(
            r#"
            work_dir = "/srv/karaoke/uploads"
            default_language = "pt"

            [separation]
            strategy = "source-separation"

            [transcription]
            preferred_model = "large-v3"
            model_dir = "/srv/models"

            [subtitles]
            format = "srt"
            karaoke_font_size = 64

            [video]
            width = 1920
            height = 1080
            background = { type = "waveform", color = "0x33ccff" }
            "#,
        )
        .unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/srv/karaoke/uploads"));
        assert_eq!(
            config.separation.strategy,
            SeparationStrategy::SourceSeparation
        );
        assert_eq!(config.separation.model, "htdemucs");
        assert_eq!(config.transcription.preferred_model, ModelTier::LargeV3);
        assert_eq!(config.transcription.fallback_model, ModelTier::Base);
        assert_eq!(config.subtitles.format, SubtitleFormat::Srt);
        assert_eq!(config.subtitles.karaoke_font_size, 64);
        assert_eq!(config.subtitles.preview_font_size, 36);
        assert_eq!(
            config.video.background,
            Background::Waveform {
                color: "0x33ccff".into()
            }
        );
    }

    #[test]
    fn test_from_toml_image_background() {
        let config = KaraokeConfig::from_toml(
            r#"
            [video.background]
            type = "image"
            path = "/srv/bg.jpg"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.video.background,
            Background::Image {
                path: PathBuf::from("/srv/bg.jpg")
            }
        );
    }

    #[test]
    fn test_from_toml_rejects_bad_syntax() {
        let result = KaraokeConfig::from_toml("work_dir = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_toml_rejects_odd_size() {
        let result = KaraokeConfig::from_toml("[video]\nwidth = 1281\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_toml_rejects_unknown_language() {
        let result = KaraokeConfig::from_toml("default_language = \"klingon\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let result = KaraokeConfig::load_or_default(Some(Path::new("/nonexistent/karaoke.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_none() {
        let config = KaraokeConfig::load_or_default(None).unwrap();
        assert_eq!(config.video.width, 1280);
    }

    #[test]
    fn test_builder_overrides() {
        let config = KaraokeConfig::new()
            .work_dir(PathBuf::from("/tmp/k"))
            .subtitle_format(SubtitleFormat::Srt)
            .video_size(640, 360)
            .tool_timeout_secs(5);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/k"));
        assert_eq!(config.subtitles.format, SubtitleFormat::Srt);
        assert_eq!((config.video.width, config.video.height), (640, 360));
        assert_eq!(config.tool_timeout(), Duration::from_secs(5));
    }
}
