use std::fmt;
use std::path::PathBuf;

/// Pipeline stage that an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Separation,
    Transcription,
    Formatting,
    Composition,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Separation => "vocal separation",
            Stage::Transcription => "transcription",
            Stage::Formatting => "subtitle formatting",
            Stage::Composition => "video composition",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All errors that can occur in karaoke.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no whisper model found (searched: {})", display_paths(.searched))]
    ModelNotFound { searched: Vec<PathBuf> },

    #[error("unsupported language: \"{0}\" — use Language::supported() to list valid codes")]
    UnsupportedLanguage(String),

    #[error("vocal separation failed: {0}")]
    Separation(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("subtitle formatting failed: {0}")]
    Formatting(String),

    #[error("video composition failed: {0}")]
    Composition(String),

    #[error("run aborted during {stage}")]
    Aborted { stage: Stage },

    #[error("config error: {0}")]
    Config(String),

    #[cfg(feature = "download")]
    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "download")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stage this error belongs to, if it is a stage failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Separation(_) => Some(Stage::Separation),
            Error::Transcription(_) | Error::ModelNotFound { .. } => Some(Stage::Transcription),
            Error::Formatting(_) => Some(Stage::Formatting),
            Error::Composition(_) => Some(Stage::Composition),
            Error::Aborted { stage } => Some(*stage),
            _ => None,
        }
    }

    /// Attribute a loose error (I/O, whisper, JSON) to the stage it surfaced in.
    ///
    /// Errors that already carry a stage, and configuration-class errors, are
    /// returned unchanged.
    pub fn in_stage(self, stage: Stage) -> Self {
        if self.stage().is_some() {
            return self;
        }
        match self {
            Error::InvalidInput(_) | Error::UnsupportedLanguage(_) | Error::Config(_) => self,
            other => {
                let diagnostic = other.to_string();
                match stage {
                    Stage::Separation => Error::Separation(diagnostic),
                    Stage::Transcription => Error::Transcription(diagnostic),
                    Stage::Formatting => Error::Formatting(diagnostic),
                    Stage::Composition => Error::Composition(diagnostic),
                }
            }
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
