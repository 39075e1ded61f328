//! Vocal separation.
//!
//! Splits the uploaded mix into an instrumental track and a vocal track,
//! either by phase-cancelling centre-panned content with ffmpeg or by running
//! an external stem separator.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{KaraokeConfig, SeparationStrategy};
use crate::error::{Error, Result};
use crate::process::{ensure_output, run_tool};
use crate::temp::{move_file, TempArtifact, TempManager};

/// How clean the vocal track handed to transcription is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocalQuality {
    /// Vocals isolated by a stem separator.
    Isolated,
    /// No isolation was possible; the vocal track is the original mix.
    FullMix,
}

/// Result of the separation stage.
#[derive(Debug)]
pub struct Separation {
    pub instrumental: TempArtifact,
    /// Isolated vocals, or `None` when the original input stands in for them.
    pub vocals: Option<TempArtifact>,
    pub quality: VocalQuality,
}

impl Separation {
    /// Audio to transcribe: the isolated vocals, or `input` for a full-mix result.
    pub fn vocals_path<'a>(&'a self, input: &'a Path) -> &'a Path {
        self.vocals.as_ref().map(TempArtifact::path).unwrap_or(input)
    }
}

/// Run the configured separation strategy on `input`.
pub async fn separate(config: &KaraokeConfig, temp: &TempManager, input: &Path) -> Result<Separation> {
    match config.separation.strategy {
        SeparationStrategy::SpectralCancellation => spectral_cancellation(config, temp, input).await,
        SeparationStrategy::SourceSeparation => {
            match source_separation(config, temp, input).await {
                Ok(separation) => Ok(separation),
                Err(e) if config.separation.fallback_to_spectral => {
                    warn!(error = %e, "stem separator failed, falling back to spectral cancellation");
                    spectral_cancellation(config, temp, input).await
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Cancel centre-panned content: each channel minus the other.
pub async fn spectral_cancellation(
    config: &KaraokeConfig,
    temp: &TempManager,
    input: &Path,
) -> Result<Separation> {
    info!(path = %input.display(), "removing vocals by phase cancellation");
    let instrumental = temp.allocate(".m4a")?;

    let mut args = os_args!["-nostdin", "-y", "-i"];
    args.push(input.as_os_str().to_owned());
    args.extend(os_args![
        "-af",
        "pan=stereo|c0=c0-c1|c1=c1-c0",
        "-c:a",
        "aac",
        "-ar",
        "44100",
    ]);
    args.push(instrumental.path().as_os_str().to_owned());

    run_tool(&config.tools.ffmpeg, &args, config.tool_timeout())
        .await
        .map_err(|e| Error::Separation(e.to_string()))?;
    ensure_output(instrumental.path()).map_err(|e| Error::Separation(e.to_string()))?;

    Ok(Separation {
        instrumental,
        vocals: None,
        quality: VocalQuality::FullMix,
    })
}

/// Split with a demucs-compatible separator.
pub async fn source_separation(
    config: &KaraokeConfig,
    temp: &TempManager,
    input: &Path,
) -> Result<Separation> {
    let model = &config.separation.model;
    info!(path = %input.display(), %model, "separating stems");

    let out_dir = temp.allocate_dir("-stems")?;
    let mut args: Vec<OsString> = os_args!["--two-stems=vocals", "-n", model.as_str(), "-o"];
    args.push(out_dir.path().as_os_str().to_owned());
    args.push(input.as_os_str().to_owned());

    run_tool(&config.tools.demucs, &args, config.tool_timeout())
        .await
        .map_err(|e| Error::Separation(e.to_string()))?;

    let stem_dir = stem_dir(out_dir.path(), model, input)?;
    let no_vocals = find_stem(&stem_dir, "no_vocals")?;
    let vocals = find_stem(&stem_dir, "vocals")?;

    let instrumental = temp.allocate(&extension_suffix(&no_vocals))?;
    move_file(&no_vocals, instrumental.path())?;
    let isolated = temp.allocate(&extension_suffix(&vocals))?;
    move_file(&vocals, isolated.path())?;
    out_dir.release();

    Ok(Separation {
        instrumental,
        vocals: Some(isolated),
        quality: VocalQuality::Isolated,
    })
}

/// `<out>/<model>/<input file stem>/`
fn stem_dir(out: &Path, model: &str, input: &Path) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .ok_or_else(|| Error::Separation(format!("input {} has no file name", input.display())))?;
    Ok(out.join(model).join(stem))
}

/// Find `<name>.*` in `dir`, non-empty.
fn find_stem(dir: &Path, name: &str) -> Result<PathBuf> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Separation(format!("stem directory {} unreadable: {e}", dir.display()))
    })?;
    let found = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.file_stem().is_some_and(|s| s == name) && p.is_file())
        .ok_or_else(|| {
            Error::Separation(format!("stem '{name}' missing in {}", dir.display()))
        })?;
    ensure_output(&found).map_err(|e| Error::Separation(e.to_string()))?;
    Ok(found)
}

fn extension_suffix(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::tests::fake_tool;

    fn setup(tmp: &Path) -> (KaraokeConfig, TempManager, PathBuf) {
        let work = tmp.join("work");
        let config = KaraokeConfig::default().work_dir(work.clone());
        let temp = TempManager::new(&work).unwrap();
        let input = tmp.join("upload-token.mp3");
        std::fs::write(&input, b"mix").unwrap();
        (config, temp, input)
    }

    fn work_entries(temp: &TempManager) -> Vec<PathBuf> {
        std::fs::read_dir(temp.root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    /// demucs stand-in writing both stems where the real tool would.
    const FAKE_DEMUCS: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    -n) model="$2"; shift 2;;
    -o) out="$2"; shift 2;;
    --*) shift;;
    *) input="$1"; shift;;
  esac
done
name=$(basename "$input"); name="${name%.*}"
mkdir -p "$out/$model/$name"
printf 'inst' > "$out/$model/$name/no_vocals.wav"
printf 'voc' > "$out/$model/$name/vocals.wav"
"#;

    #[tokio::test]
    async fn test_spectral_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        config.tools.ffmpeg = fake_tool(
            tmp.path(),
            "ffmpeg",
            "echo \"$@\" > \"$(dirname \"$0\")/args\"\nfor last; do :; done\nprintf 'aac' > \"$last\"",
        );

        let separation = spectral_cancellation(&config, &temp, &input).await.unwrap();
        assert_eq!(separation.quality, VocalQuality::FullMix);
        assert!(separation.vocals.is_none());
        assert_eq!(separation.vocals_path(&input), input.as_path());
        assert!(separation.instrumental.path().to_string_lossy().ends_with(".m4a"));

        let args = std::fs::read_to_string(tmp.path().join("args")).unwrap();
        assert!(args.contains("-af pan=stereo|c0=c0-c1|c1=c1-c0 -c:a aac -ar 44100"));
    }

    #[tokio::test]
    async fn test_source_separation_moves_stems_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        config.tools.demucs = fake_tool(tmp.path(), "demucs", FAKE_DEMUCS);

        let separation = source_separation(&config, &temp, &input).await.unwrap();
        assert_eq!(separation.quality, VocalQuality::Isolated);
        assert_eq!(std::fs::read(separation.instrumental.path()).unwrap(), b"inst");
        let vocals = separation.vocals.as_ref().unwrap();
        assert_eq!(std::fs::read(vocals.path()).unwrap(), b"voc");
        assert_eq!(separation.vocals_path(&input), vocals.path());

        // Only the two stems remain; the separator's output tree is gone.
        assert_eq!(work_entries(&temp).len(), 2);
        drop(separation);
        assert!(work_entries(&temp).is_empty());
    }

    #[tokio::test]
    async fn test_source_separation_failure_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        config.tools.demucs = fake_tool(
            tmp.path(),
            "demucs",
            "echo 'RuntimeError: CUDA out of memory' >&2\nexit 1",
        );

        let err = source_separation(&config, &temp, &input).await.unwrap_err();
        assert!(matches!(err, Error::Separation(_)));
        assert!(err.to_string().contains("CUDA out of memory"));
        assert!(work_entries(&temp).is_empty());
    }

    #[tokio::test]
    async fn test_source_separation_missing_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        // Exits 0 but only writes the instrumental.
        config.tools.demucs = fake_tool(
            tmp.path(),
            "demucs",
            &FAKE_DEMUCS.replace("printf 'voc' > \"$out/$model/$name/vocals.wav\"", ""),
        );

        let err = source_separation(&config, &temp, &input).await.unwrap_err();
        assert!(err.to_string().contains("stem 'vocals' missing"));
        assert!(work_entries(&temp).is_empty());
    }

    #[tokio::test]
    async fn test_missing_separator_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        config.tools.demucs = PathBuf::from("/nonexistent/demucs");

        let err = source_separation(&config, &temp, &input).await.unwrap_err();
        assert!(matches!(err, Error::Separation(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_fallback_to_spectral() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        config.separation.strategy = SeparationStrategy::SourceSeparation;
        config.separation.fallback_to_spectral = true;
        config.tools.demucs = fake_tool(tmp.path(), "demucs", "exit 1");
        config.tools.ffmpeg = fake_tool(
            tmp.path(),
            "ffmpeg",
            "for last; do :; done\nprintf 'aac' > \"$last\"",
        );

        let separation = separate(&config, &temp, &input).await.unwrap();
        assert_eq!(separation.quality, VocalQuality::FullMix);
    }

    #[tokio::test]
    async fn test_no_fallback_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut config, temp, input) = setup(tmp.path());
        config.separation.strategy = SeparationStrategy::SourceSeparation;
        config.tools.demucs = fake_tool(tmp.path(), "demucs", "exit 1");

        assert!(separate(&config, &temp, &input).await.is_err());
    }
}
