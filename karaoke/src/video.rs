//! Video composition.
//!
//! Two ffmpeg passes: the first renders the background with the instrumental
//! track, the second burns the title and karaoke subtitles into it.

use std::ffi::OsString;
use std::path::Path;

use tracing::info;

use crate::audio::probe_duration;
use crate::config::{Background, KaraokeConfig, SubtitleFormat};
use crate::error::{Error, Result};
use crate::process::{ensure_output, run_tool};
use crate::temp::{TempArtifact, TempManager};
use crate::types::AudioAsset;

/// Subtitle files handed to the second pass.
#[derive(Debug, Clone, Copy)]
pub struct SubtitleTracks<'a> {
    pub format: SubtitleFormat,
    pub title: &'a Path,
    pub karaoke: &'a Path,
    /// `force_style` of each track in SRT mode; ignored for ASS.
    pub title_style: &'a str,
    pub karaoke_style: &'a str,
}

pub struct VideoComposer<'a> {
    config: &'a KaraokeConfig,
    temp: &'a TempManager,
}

impl<'a> VideoComposer<'a> {
    pub fn new(config: &'a KaraokeConfig, temp: &'a TempManager) -> Self {
        Self { config, temp }
    }

    /// Render the final video. The intermediate base video is always removed.
    pub async fn compose(
        &self,
        audio: &AudioAsset,
        subtitles: SubtitleTracks<'_>,
    ) -> Result<TempArtifact> {
        let base = self.render_base(audio).await?;
        self.burn_subtitles(base.path(), subtitles).await
    }

    /// Pass A: background plus audio, encoded to mp4.
    ///
    /// A solid background needs the audio length; it is probed unless the
    /// asset already carries it.
    pub async fn render_base(&self, audio: &AudioAsset) -> Result<TempArtifact> {
        let video = &self.config.video;
        info!(
            width = video.width,
            height = video.height,
            background = ?video.background,
            "rendering base video"
        );

        let duration = match (&video.background, audio.duration) {
            (Background::Solid { .. }, None) => Some(
                probe_duration(
                    &self.config.tools.ffprobe,
                    audio.path(),
                    self.config.tool_timeout(),
                )
                .await
                .map_err(|e| Error::Composition(e.to_string()))?,
            ),
            (_, known) => known,
        };

        let out = self.temp.allocate(".mp4")?;
        let args = self.base_args(audio.path(), duration, out.path());
        self.run_ffmpeg(&args, out.path()).await?;
        Ok(out)
    }

    /// Pass B: burn the title card, then the karaoke lines.
    pub async fn burn_subtitles(
        &self,
        base: &Path,
        subtitles: SubtitleTracks<'_>,
    ) -> Result<TempArtifact> {
        info!("burning subtitles");
        let out = self.temp.allocate(".mp4")?;
        let args = self.burn_args(base, subtitles, out.path());
        self.run_ffmpeg(&args, out.path()).await?;
        Ok(out)
    }

    fn base_args(&self, audio: &Path, duration: Option<f64>, out: &Path) -> Vec<OsString> {
        let v = &self.config.video;
        let (w, h, fps) = (v.width, v.height, v.fps);

        let mut args = os_args!["-nostdin", "-y"];
        match &v.background {
            Background::Image { path } => {
                args.extend(os_args!["-loop", "1", "-i"]);
                args.push(path.as_os_str().to_owned());
                args.push("-i".into());
                args.push(audio.as_os_str().to_owned());
                args.push("-vf".into());
                args.push(
                    format!(
                        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
                         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,format=yuv420p"
                    )
                    .into(),
                );
                args.extend(os_args!["-r", fps.to_string()]);
            }
            Background::Solid { color } => {
                let duration = duration.unwrap_or(0.0);
                args.extend(os_args!["-f", "lavfi", "-i"]);
                args.push(format!("color=c={color}:s={w}x{h}:r={fps}:d={duration:.3}").into());
                args.push("-i".into());
                args.push(audio.as_os_str().to_owned());
                args.extend(os_args!["-map", "0:v", "-map", "1:a", "-pix_fmt", "yuv420p"]);
            }
            Background::Waveform { color } => {
                args.push("-i".into());
                args.push(audio.as_os_str().to_owned());
                args.push("-filter_complex".into());
                args.push(
                    format!(
                        "[0:a]showwaves=s={w}x{h}:mode=cline:rate={fps}:colors={color},format=yuv420p[v]"
                    )
                    .into(),
                );
                args.extend(os_args!["-map", "[v]", "-map", "0:a"]);
            }
        }
        args.extend(self.encoder_args());
        args.extend(os_args!["-c:a", "aac", "-b:a", "192k", "-shortest"]);
        args.push(out.as_os_str().to_owned());
        args
    }

    fn burn_args(&self, base: &Path, subtitles: SubtitleTracks<'_>, out: &Path) -> Vec<OsString> {
        let filter = format!(
            "{},{}",
            subtitle_filter(subtitles.format, subtitles.title, subtitles.title_style),
            subtitle_filter(subtitles.format, subtitles.karaoke, subtitles.karaoke_style),
        );

        let mut args = os_args!["-nostdin", "-y", "-i"];
        args.push(base.as_os_str().to_owned());
        args.push("-vf".into());
        args.push(filter.into());
        args.extend(self.encoder_args());
        args.extend(os_args!["-pix_fmt", "yuv420p", "-c:a", "copy"]);
        args.push(out.as_os_str().to_owned());
        args
    }

    fn encoder_args(&self) -> Vec<OsString> {
        let v = &self.config.video;
        os_args![
            "-c:v",
            v.codec.as_str(),
            "-preset",
            v.preset.as_str(),
            "-b:v",
            v.bitrate.as_str(),
        ]
    }

    async fn run_ffmpeg(&self, args: &[OsString], out: &Path) -> Result<()> {
        run_tool(&self.config.tools.ffmpeg, args, self.config.tool_timeout())
            .await
            .map_err(|e| Error::Composition(e.to_string()))?;
        ensure_output(out).map_err(|e| Error::Composition(e.to_string()))
    }
}

/// The filter that burns one subtitle file.
pub fn subtitle_filter(format: SubtitleFormat, path: &Path, force_style: &str) -> String {
    let path = escape_filter_path(path);
    match format {
        SubtitleFormat::Ass => format!("ass={path}"),
        SubtitleFormat::Srt => format!("subtitles={path}:force_style='{force_style}'"),
    }
}

/// Escape a path for use as a filter option inside an ffmpeg filter graph.
///
/// The value is escaped twice: once for the filter's option parser and once
/// for the graph parser that reads it first.
pub fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let raw = if cfg!(windows) {
        raw.replace('\\', "/")
    } else {
        raw.into_owned()
    };
    let option_level = backslash_escape(&raw, &['\\', '\'', ':']);
    backslash_escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn backslash_escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
