//! Lyric transcription.
//!
//! The stage converts the vocal track to 16 kHz mono PCM with ffmpeg, hands
//! the samples to a [`Recognizer`] on a blocking thread and returns segments
//! sorted by start time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{self, WHISPER_SAMPLE_RATE};
use crate::config::{KaraokeConfig, Language};
use crate::error::{Error, Result};
use crate::model::model_label;
use crate::temp::TempManager;
use crate::types::{Transcript, TranscriptSegment};

/// Everything a recognizer needs besides the samples.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub model_path: PathBuf,
    pub language: Language,
    /// Initial prompt biasing the decoder toward sung lyrics.
    pub prompt: Option<String>,
    pub gpu: bool,
    pub n_threads: Option<u32>,
    pub beam_size: Option<u32>,
    pub temperature: f32,
}

/// Speech recognition engine: 16kHz mono f32 samples in, timed text out.
///
/// Implementations block; the stage runs them on tokio's blocking pool.
pub trait Recognizer: Send + Sync + 'static {
    fn recognize(
        &self,
        samples: &[f32],
        request: &RecognitionRequest,
    ) -> Result<Vec<TranscriptSegment>>;
}

/// whisper.cpp through whisper-rs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhisperRecognizer;

impl Recognizer for WhisperRecognizer {
    fn recognize(
        &self,
        samples: &[f32],
        request: &RecognitionRequest,
    ) -> Result<Vec<TranscriptSegment>> {
        info!(model = %request.model_path.display(), "loading whisper model");

        let mut ctx_params = WhisperContextParameters::new();
        ctx_params.use_gpu(request.gpu);

        let ctx = WhisperContext::new_with_params(
            request.model_path.to_str().ok_or_else(|| {
                Error::Transcription("model path contains invalid UTF-8".into())
            })?,
            ctx_params,
        )?;

        let mut state = ctx.create_state()?;

        let mut params = match request.beam_size {
            Some(beam_size) => FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: beam_size as i32,
                patience: -1.0,
            }),
            None => FullParams::new(SamplingStrategy::Greedy { best_of: 5 }),
        };

        match &request.language {
            Language::Auto => params.set_detect_language(true),
            Language::Code { code, .. } => params.set_language(Some(code)),
        }

        // Lyrics are always transcribed in the sung language.
        params.set_translate(false);
        params.set_temperature(request.temperature);
        if let Some(prompt) = &request.prompt {
            params.set_initial_prompt(prompt);
        }
        if let Some(n) = request.n_threads {
            params.set_n_threads(n as i32);
        }

        // Disable stderr printing from whisper.cpp
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        info!(samples = samples.len(), "running transcription");
        state.full(params, samples)?;

        let num_segments = state.full_n_segments();
        debug!(num_segments, "transcription complete");

        let mut segments = Vec::with_capacity(num_segments.max(0) as usize);
        for i in 0..num_segments {
            let segment = state
                .get_segment(i)
                .ok_or_else(|| Error::Transcription(format!("segment {i} not found")))?;

            let text = segment
                .to_str_lossy()
                .map_err(|e| Error::Transcription(format!("segment text error: {e}")))?
                .into_owned();

            // whisper timestamps are in centiseconds
            segments.push(TranscriptSegment::new(
                segment.start_timestamp() as f64 / 100.0,
                segment.end_timestamp() as f64 / 100.0,
                text,
            ));
        }

        Ok(segments)
    }
}

/// Short hint telling the decoder it is listening to song lyrics.
pub fn lyric_prompt(language: &Language) -> Option<&'static str> {
    let prompt = match language.code()? {
        "en" => "Song lyrics.",
        "pt" => "Letra de música.",
        "es" => "Letra de canción.",
        "fr" => "Paroles de chanson.",
        "de" => "Liedtext.",
        "it" => "Testo della canzone.",
        "nl" => "Songtekst.",
        "ja" => "歌詞。",
        _ => return None,
    };
    Some(prompt)
}

/// Enforce `end >= start` on every segment and order them by start time.
/// The sort is stable, so segments starting together keep recognizer order.
pub fn normalize_segments(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    for segment in &mut segments {
        if segment.end < segment.start {
            segment.end = segment.start;
        }
    }
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    segments
}

/// The transcription stage: audio file in, [`Transcript`] out.
pub struct Transcriber<R: Recognizer> {
    recognizer: Arc<R>,
}

impl<R: Recognizer> Clone for Transcriber<R> {
    fn clone(&self) -> Self {
        Self {
            recognizer: Arc::clone(&self.recognizer),
        }
    }
}

impl<R: Recognizer> Transcriber<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
        }
    }

    /// Transcribe `vocals` with the model at `model_path`.
    ///
    /// The intermediate PCM file is removed before this returns, whatever
    /// the outcome.
    pub async fn transcribe(
        &self,
        config: &KaraokeConfig,
        temp: &TempManager,
        vocals: &Path,
        model_path: &Path,
        language: &Language,
    ) -> Result<Transcript> {
        let pcm = temp.allocate(".pcm")?;
        audio::convert_for_recognizer(
            &config.tools.ffmpeg,
            vocals,
            pcm.path(),
            config.tool_timeout(),
        )
        .await?;
        let samples = audio::read_pcm_s16le(pcm.path())?;
        let duration = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;

        let request = RecognitionRequest {
            model_path: model_path.to_path_buf(),
            language: language.clone(),
            prompt: if config.transcription.lyric_prompt {
                lyric_prompt(language).map(str::to_string)
            } else {
                None
            },
            gpu: config.transcription.gpu,
            n_threads: config.transcription.n_threads,
            beam_size: config.transcription.beam_size,
            temperature: config.transcription.temperature,
        };

        let recognizer = Arc::clone(&self.recognizer);
        let segments = tokio::task::spawn_blocking(move || recognizer.recognize(&samples, &request))
            .await
            .map_err(|e| Error::Transcription(format!("recognizer task failed: {e}")))??;
        pcm.release();

        let segments = normalize_segments(segments);
        info!(segments = segments.len(), "lyrics transcribed");

        Ok(Transcript {
            segments,
            language: language.to_string(),
            duration,
            model: model_label(model_path),
        })
    }
}
