//! Pipeline orchestration.
//!
//! A run moves through `Uploaded → Separating → Transcribing → Formatting →
//! Composing → Done`, or to `Failed` from any stage. Every intermediate file
//! is a [`TempArtifact`] owned by the run future, so finishing, failing or
//! dropping that future removes them; only the final video is handed out.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::config::{KaraokeConfig, Language};
use crate::error::{Error, Result, Stage};
use crate::model::resolve_model;
use crate::separation::{self, VocalQuality};
use crate::subtitle::SubtitleFormatter;
use crate::temp::{RandomTokens, TempArtifact, TempManager, TokenSource};
use crate::transcribe::{Recognizer, Transcriber, WhisperRecognizer};
use crate::types::{AudioAsset, Transcript, VideoArtifact};
use crate::upload;
use crate::video::{SubtitleTracks, VideoComposer};

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Uploaded,
    Separating,
    Transcribing,
    Formatting,
    Composing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// The stage that does its work in this state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Separating => Some(Stage::Separation),
            RunState::Transcribing => Some(Stage::Transcription),
            RunState::Formatting => Some(Stage::Formatting),
            RunState::Composing => Some(Stage::Composition),
            _ => None,
        }
    }

    fn next(&self) -> Option<RunState> {
        match self {
            RunState::Uploaded => Some(RunState::Separating),
            RunState::Separating => Some(RunState::Transcribing),
            RunState::Transcribing => Some(RunState::Formatting),
            RunState::Formatting => Some(RunState::Composing),
            RunState::Composing => Some(RunState::Done),
            RunState::Done | RunState::Failed => None,
        }
    }

    /// Stages advance in fixed order; any live state may fail.
    pub fn can_advance_to(&self, to: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == RunState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Uploaded => "uploaded",
            RunState::Separating => "separating vocals",
            RunState::Transcribing => "transcribing lyrics",
            RunState::Formatting => "formatting subtitles",
            RunState::Composing => "composing video",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for one upload.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: String,
    pub state: RunState,
    /// Every state the run has been in, oldest first.
    pub history: Vec<RunState>,
    /// Set once separation finished.
    pub vocal_quality: Option<VocalQuality>,
}

impl PipelineRun {
    fn new(id: String) -> Self {
        Self {
            id,
            state: RunState::Uploaded,
            history: vec![RunState::Uploaded],
            vocal_quality: None,
        }
    }

    fn advance(&mut self, to: RunState) {
        debug_assert!(
            self.state.can_advance_to(to),
            "illegal run transition {:?} -> {:?}",
            self.state,
            to
        );
        self.state = to;
        self.history.push(to);
    }
}

/// One uploaded song to turn into a video.
#[derive(Debug)]
pub struct KaraokeRequest {
    /// Staged upload; deleted when the run ends.
    pub upload: TempArtifact,
    /// Language code or name; `None` uses the configured default.
    pub language: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl KaraokeRequest {
    pub fn new(upload: TempArtifact) -> Self {
        Self {
            upload,
            language: None,
            title: None,
            artist: None,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }
}

/// What a successful run hands back.
#[derive(Debug)]
pub struct KaraokeOutput {
    /// The caller owns this file.
    pub video: VideoArtifact,
    pub transcript: Transcript,
    pub run: PipelineRun,
}

type Observer = Arc<dyn Fn(&PipelineRun) + Send + Sync>;

/// Turns uploads into karaoke videos. Cheap to share across tasks.
pub struct Pipeline<R: Recognizer = WhisperRecognizer> {
    config: Arc<KaraokeConfig>,
    temp: TempManager,
    transcriber: Transcriber<R>,
    observer: Option<Observer>,
}

impl Pipeline<WhisperRecognizer> {
    /// Pipeline using whisper.cpp for recognition.
    pub fn new(config: KaraokeConfig) -> Result<Self> {
        Self::with_recognizer(config, WhisperRecognizer)
    }
}

impl<R: Recognizer> Pipeline<R> {
    pub fn with_recognizer(config: KaraokeConfig, recognizer: R) -> Result<Self> {
        Self::with_parts(config, recognizer, RandomTokens)
    }

    /// Full control over the recognizer and temp-name tokens.
    pub fn with_parts(
        config: KaraokeConfig,
        recognizer: R,
        tokens: impl TokenSource + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let temp = TempManager::with_tokens(&config.work_dir, tokens)?;
        Ok(Self {
            config: Arc::new(config),
            temp,
            transcriber: Transcriber::new(recognizer),
            observer: None,
        })
    }

    /// Call `observer` on every state change of every run.
    pub fn with_observer(mut self, observer: impl Fn(&PipelineRun) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &KaraokeConfig {
        &self.config
    }

    pub fn temp(&self) -> &TempManager {
        &self.temp
    }

    /// Validate and stage a local file as an upload.
    pub fn accept_upload(&self, source: &Path) -> Result<TempArtifact> {
        upload::accept_file(&self.temp, source)
    }

    /// Validate and stage an in-memory upload.
    pub fn accept_bytes(&self, file_name: &str, bytes: &[u8]) -> Result<TempArtifact> {
        upload::accept_bytes(&self.temp, file_name, bytes)
    }

    /// Run the whole pipeline for one upload.
    pub async fn run(&self, request: KaraokeRequest) -> Result<KaraokeOutput> {
        self.run_until(request, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but gives up as soon as `abort` completes.
    ///
    /// Aborting kills the running external tool and removes every artifact
    /// of the run, exactly like a failure.
    pub async fn run_until(
        &self,
        request: KaraokeRequest,
        abort: impl Future<Output = ()>,
    ) -> Result<KaraokeOutput> {
        let run = Mutex::new(PipelineRun::new(RandomTokens.next_token()));
        self.notify(&run);

        let outcome = {
            let work = self.execute(&run, request);
            tokio::select! {
                result = work => Some(result),
                _ = abort => None,
            }
        };

        match outcome {
            Some(Ok((video, transcript))) => {
                self.transition(&run, RunState::Done);
                let run = snapshot(&run);
                info!(run = %run.id, video = %video.path.display(), "karaoke video ready");
                Ok(KaraokeOutput {
                    video,
                    transcript,
                    run,
                })
            }
            Some(Err(e)) => {
                self.transition(&run, RunState::Failed);
                error!(run = %snapshot(&run).id, error = %e, "run failed");
                Err(e)
            }
            None => {
                let stage = snapshot(&run).state.stage().unwrap_or(Stage::Separation);
                self.transition(&run, RunState::Failed);
                warn!(run = %snapshot(&run).id, %stage, "run aborted");
                Err(Error::Aborted { stage })
            }
        }
    }

    async fn execute(
        &self,
        run: &Mutex<PipelineRun>,
        request: KaraokeRequest,
    ) -> Result<(VideoArtifact, Transcript)> {
        let config = &*self.config;
        let KaraokeRequest {
            upload,
            language,
            title,
            artist,
        } = request;

        // Configuration problems surface before any tool runs.
        let language = Language::new(language.as_deref().unwrap_or(&config.default_language))?;
        let model_path = resolve_model(&config.transcription, language.code())?;
        let run_id = snapshot(run).id;

        self.transition(run, RunState::Separating);
        info!(run = %run_id, strategy = ?config.separation.strategy, "separating vocals");
        let separation = separation::separate(config, &self.temp, upload.path())
            .await
            .map_err(|e| e.in_stage(Stage::Separation))?;
        if separation.quality == VocalQuality::FullMix {
            warn!(run = %run_id, "no isolated vocals, transcribing the full mix");
        }
        lock(run).vocal_quality = Some(separation.quality);

        self.transition(run, RunState::Transcribing);
        info!(run = %run_id, language = %language, "transcribing lyrics");
        let transcript = self
            .transcriber
            .transcribe(
                config,
                &self.temp,
                separation.vocals_path(upload.path()),
                &model_path,
                &language,
            )
            .await
            .map_err(|e| e.in_stage(Stage::Transcription))?;
        // Vocals are no longer needed.
        let instrumental = separation.instrumental;
        drop(separation.vocals);

        self.transition(run, RunState::Formatting);
        info!(run = %run_id, segments = transcript.segments.len(), "formatting subtitles");
        let formatter = SubtitleFormatter::new(&config.subtitles, config.video.width, config.video.height);
        let (title_subs, karaoke_subs) = self
            .write_subtitles(&formatter, &transcript, title.as_deref(), artist.as_deref())
            .map_err(|e| e.in_stage(Stage::Formatting))?;

        self.transition(run, RunState::Composing);
        info!(run = %run_id, "composing video");
        let title_style = formatter.title_force_style();
        let karaoke_style = formatter.karaoke_force_style();
        let video = VideoComposer::new(config, &self.temp)
            .compose(
                &AudioAsset::new(instrumental.path()),
                SubtitleTracks {
                    format: config.subtitles.format,
                    title: title_subs.path(),
                    karaoke: karaoke_subs.path(),
                    title_style: &title_style,
                    karaoke_style: &karaoke_style,
                },
            )
            .await
            .map_err(|e| e.in_stage(Stage::Composition))?;

        let path = video.into_path();
        let file_name = upload::download_name(title.as_deref(), artist.as_deref(), &path);
        Ok((
            VideoArtifact {
                path,
                mime_type: "video/mp4",
                file_name,
            },
            transcript,
        ))
    }

    /// Title document and karaoke document, in that order.
    fn write_subtitles(
        &self,
        formatter: &SubtitleFormatter<'_>,
        transcript: &Transcript,
        title: Option<&str>,
        artist: Option<&str>,
    ) -> Result<(TempArtifact, TempArtifact)> {
        let ext = self.config.subtitles.format.extension();
        let title_subs = self.temp.allocate(ext)?;
        formatter
            .title_document(title, artist)
            .write_to(title_subs.path())?;
        let karaoke_subs = self.temp.allocate(ext)?;
        formatter
            .karaoke_document(&transcript.segments)
            .write_to(karaoke_subs.path())?;
        Ok((title_subs, karaoke_subs))
    }

    fn transition(&self, run: &Mutex<PipelineRun>, to: RunState) {
        lock(run).advance(to);
        self.notify(run);
    }

    fn notify(&self, run: &Mutex<PipelineRun>) {
        if let Some(observer) = &self.observer {
            observer(&snapshot(run));
        }
    }
}

fn lock(run: &Mutex<PipelineRun>) -> std::sync::MutexGuard<'_, PipelineRun> {
    run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn snapshot(run: &Mutex<PipelineRun>) -> PipelineRun {
    lock(run).clone()
}
