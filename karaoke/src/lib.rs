//! Karaoke video generation: song in, sing-along video out.
//!
//! **karaoke** runs the full pipeline: vocal separation (ffmpeg phase
//! cancellation or an external stem separator), lyric transcription (via
//! whisper.cpp), word-timed karaoke subtitles (ASS or SRT), and a two-pass
//! ffmpeg render that burns the subtitles over a background with the
//! instrumental track.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> karaoke::Result<()> {
//! use karaoke::{KaraokeConfig, KaraokeRequest, Pipeline};
//!
//! let pipeline = Pipeline::new(KaraokeConfig::default())?;
//! let upload = pipeline.accept_upload("song.mp3".as_ref())?;
//! let output = pipeline
//!     .run(KaraokeRequest::new(upload).language("pt").title("Song").artist("Band"))
//!     .await?;
//! println!("{} -> {}", output.video.path.display(), output.video.file_name);
//! # Ok(())
//! # }
//! ```
//!
//! Every intermediate file lives under [`KaraokeConfig::work_dir`] and is
//! removed when the run ends, whether it succeeds, fails or is aborted.

/// Build a `Vec<OsString>` from string-like arguments.
macro_rules! os_args {
    ($($arg:expr),* $(,)?) => {
        vec![$(::std::ffi::OsString::from($arg)),*]
    };
}

pub mod audio;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod separation;
pub mod subtitle;
pub mod temp;
pub mod transcribe;
pub mod types;
pub mod upload;
pub mod video;

pub use config::{
    Background, KaraokeConfig, Language, ModelTier, SeparationStrategy, SubtitleFormat,
};
pub use error::{Error, Result, Stage};
pub use pipeline::{KaraokeOutput, KaraokeRequest, Pipeline, PipelineRun, RunState};
pub use separation::VocalQuality;
pub use subtitle::{SubtitleDocument, SubtitleFormatter};
pub use temp::{TempArtifact, TempManager};
pub use transcribe::{Recognizer, RecognitionRequest, WhisperRecognizer};
pub use types::{AudioAsset, Transcript, TranscriptSegment, VideoArtifact};
