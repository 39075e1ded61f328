use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::TranscriptionConfig;
#[cfg(feature = "download")]
use crate::config::ModelTier;
use crate::error::{Error, Result};
#[cfg(feature = "download")]
use crate::temp::{move_file, TempManager};

#[cfg(feature = "download")]
const HUGGINGFACE_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Files checked for a model, most preferred first.
///
/// Language-suffixed names are only tried when a language code is given.
pub fn model_candidates(config: &TranscriptionConfig, language: Option<&str>) -> Vec<PathBuf> {
    let dir = config.resolve_model_dir();
    let mut names = Vec::with_capacity(4);
    for tier in [config.preferred_model, config.fallback_model] {
        if let Some(code) = language {
            names.push(tier.filename(Some(code)));
        }
        names.push(tier.filename(None));
    }

    let mut paths: Vec<PathBuf> = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(name);
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Pick the model file for a run.
///
/// An explicit `model_file` wins; otherwise the first existing candidate from
/// [`model_candidates`]. Fails with [`Error::ModelNotFound`] listing every
/// path that was checked.
pub fn resolve_model(config: &TranscriptionConfig, language: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = &config.model_file {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(Error::ModelNotFound {
            searched: vec![path.clone()],
        });
    }

    let candidates = model_candidates(config, language);
    for path in &candidates {
        if path.is_file() {
            info!(path = %path.display(), "using whisper model");
            return Ok(path.clone());
        }
        debug!(path = %path.display(), "model candidate missing");
    }
    Err(Error::ModelNotFound {
        searched: candidates,
    })
}

/// Short model name for reports: `ggml-base.en.bin` → `base.en`.
pub fn model_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_prefix("ggml-").unwrap_or(&stem).to_string()
}

/// Path of `tier`'s model in `cache_dir`, fetching it from the whisper.cpp
/// model repository when missing.
#[cfg(feature = "download")]
pub async fn ensure_model(tier: ModelTier, cache_dir: &Path) -> Result<PathBuf> {
    let filename = tier.filename(None);
    let model_path = cache_dir.join(&filename);
    if model_path.is_file() {
        debug!(path = %model_path.display(), "model already present");
        return Ok(model_path);
    }

    let url = format!("{HUGGINGFACE_BASE}/{filename}");
    info!(model = tier.name(), size = tier.size_hint(), %url, "fetching model");
    download_model(&url, &model_path).await?;
    Ok(model_path)
}

/// Stream `url` into a partial file next to `dest` and move it into place
/// once it is complete and looks like a ggml model. A failed or interrupted
/// download leaves nothing behind.
#[cfg(feature = "download")]
async fn download_model(url: &str, dest: &Path) -> Result<()> {
    use futures_util::StreamExt;
    use indicatif::{ProgressBar, ProgressStyle};
    use tokio::io::AsyncWriteExt;

    let response = reqwest::get(url)
        .await?
        .error_for_status()
        .map_err(|e| Error::ModelDownload(format!("{url}: {e}")))?;
    let expected = response.content_length();
    let label = model_label(dest);

    let progress = match expected {
        Some(len) => ProgressBar::new(len).with_style(
            ProgressStyle::with_template("{prefix:>14} {bar:40.cyan/blue} {bytes:>10}/{total_bytes} {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        ),
        None => ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{prefix:>14} {spinner} {bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        ),
    };
    progress.set_prefix(label.clone());

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let part = TempManager::new(dir)?.allocate(".part")?;
    let mut file = tokio::fs::File::create(part.path()).await?;
    let mut received: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        progress.set_position(received);
    }
    file.flush().await?;
    drop(file);
    progress.finish_and_clear();

    if let Some(expected) = expected {
        if received != expected {
            return Err(Error::ModelDownload(format!(
                "{label}: connection closed after {received} of {expected} bytes"
            )));
        }
    }
    check_model_header(part.path())?;
    move_file(part.path(), dest)?;

    info!(model = %label, path = %dest.display(), bytes = received, "model saved");
    Ok(())
}

/// Magic bytes at the start of every whisper.cpp model (`0x67676d6c`, LE).
#[cfg(feature = "download")]
const GGML_MAGIC: [u8; 4] = *b"lmgg";

/// Reject files that are not ggml models, such as an HTML error page.
#[cfg(feature = "download")]
fn check_model_header(path: &Path) -> Result<()> {
    use std::io::Read;

    let mut magic = [0u8; 4];
    let ok = std::fs::File::open(path)?.read_exact(&mut magic).is_ok() && magic == GGML_MAGIC;
    if ok {
        Ok(())
    } else {
        Err(Error::ModelDownload(format!(
            "{} is not a ggml model file",
            path.display()
        )))
    }
}

/// List all model files in a directory.
pub fn list_cached_models(cache_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return Vec::new();
    };

    let mut models: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    models.sort();
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelTier;
    use std::fs;

    fn config_in(dir: &Path) -> TranscriptionConfig {
        TranscriptionConfig {
            model_dir: Some(dir.to_path_buf()),
            preferred_model: ModelTier::Medium,
            fallback_model: ModelTier::Base,
            ..TranscriptionConfig::default()
        }
    }

    #[test]
    fn test_candidate_order_with_language() {
        let dir = Path::new("/models");
        let names: Vec<String> = model_candidates(&config_in(dir), Some("pt"))
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "ggml-medium.pt.bin",
                "ggml-medium.bin",
                "ggml-base.pt.bin",
                "ggml-base.bin"
            ]
        );
    }

    #[test]
    fn test_candidate_order_without_language() {
        let dir = Path::new("/models");
        let paths = model_candidates(&config_in(dir), None);
        assert_eq!(
            paths,
            [dir.join("ggml-medium.bin"), dir.join("ggml-base.bin")]
        );
    }

    #[test]
    fn test_candidates_deduplicate_same_tier() {
        let config = TranscriptionConfig {
            preferred_model: ModelTier::Base,
            ..config_in(Path::new("/models"))
        };
        assert_eq!(model_candidates(&config, Some("en")).len(), 2);
    }

    #[test]
    fn test_resolve_prefers_preferred_tier() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("ggml-medium.bin"), b"m").unwrap();
        fs::write(tmp.path().join("ggml-base.bin"), b"b").unwrap();
        let path = resolve_model(&config_in(tmp.path()), Some("en")).unwrap();
        assert_eq!(path, tmp.path().join("ggml-medium.bin"));
    }

    #[test]
    fn test_resolve_prefers_language_specific_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("ggml-base.en.bin"), b"e").unwrap();
        fs::write(tmp.path().join("ggml-base.bin"), b"b").unwrap();
        let path = resolve_model(&config_in(tmp.path()), Some("en")).unwrap();
        assert_eq!(path, tmp.path().join("ggml-base.en.bin"));
    }

    #[test]
    fn test_resolve_falls_back_to_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("ggml-base.bin"), b"b").unwrap();
        let path = resolve_model(&config_in(tmp.path()), Some("pt")).unwrap();
        assert_eq!(path, tmp.path().join("ggml-base.bin"));
    }

    #[test]
    fn test_resolve_nothing_present_lists_searched_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_model(&config_in(tmp.path()), Some("pt")).unwrap_err();
        match &err {
            Error::ModelNotFound { searched } => assert_eq!(searched.len(), 4),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("ggml-medium.pt.bin"));
    }

    #[test]
    fn test_resolve_explicit_model_file() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = tmp.path().join("my-model.bin");
        fs::write(&custom, b"fake model data").unwrap();
        let config = TranscriptionConfig {
            model_file: Some(custom.clone()),
            ..config_in(Path::new("/unused"))
        };
        assert_eq!(resolve_model(&config, None).unwrap(), custom);
    }

    #[test]
    fn test_resolve_explicit_model_file_missing() {
        let config = TranscriptionConfig {
            model_file: Some(PathBuf::from("/nonexistent/model.bin")),
            ..TranscriptionConfig::default()
        };
        assert!(matches!(
            resolve_model(&config, None),
            Err(Error::ModelNotFound { .. })
        ));
    }

    #[test]
    fn test_model_label() {
        assert_eq!(model_label(Path::new("/m/ggml-base.en.bin")), "base.en");
        assert_eq!(model_label(Path::new("/m/custom.bin")), "custom");
    }

    #[test]
    fn test_list_cached_models_nonexistent_dir() {
        let models = list_cached_models(Path::new("/nonexistent/path"));
        assert!(models.is_empty());
    }

    #[test]
    fn test_list_cached_models_finds_bin_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("ggml-tiny.bin"), b"fake model").unwrap();
        fs::write(tmp.path().join("ggml-base.bin"), b"fake model").unwrap();
        fs::write(tmp.path().join("ggml-tiny.bin.part"), b"partial").unwrap(); // excluded
        fs::write(tmp.path().join("readme.txt"), b"not a model").unwrap(); // excluded

        let models = list_cached_models(tmp.path());
        assert_eq!(models.len(), 2);
        assert!(models.iter().all(|p| p.extension().unwrap() == "bin"));
    }

    #[cfg(feature = "download")]
    #[tokio::test]
    async fn test_ensure_model_uses_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let model_path = tmp.path().join("ggml-tiny.bin");
        fs::write(&model_path, b"fake cached model").unwrap();

        let result = ensure_model(ModelTier::Tiny, tmp.path()).await;
        assert_eq!(result.unwrap(), model_path);
    }

    #[cfg(feature = "download")]
    #[test]
    fn test_check_model_header() {
        let tmp = tempfile::tempdir().unwrap();
        let model = tmp.path().join("model.part");
        fs::write(&model, b"lmgg\x01\x02\x03").unwrap();
        assert!(check_model_header(&model).is_ok());

        let page = tmp.path().join("page.part");
        fs::write(&page, b"<!DOCTYPE html>").unwrap();
        let err = check_model_header(&page).unwrap_err();
        assert!(err.to_string().contains("not a ggml model"));

        let short = tmp.path().join("short.part");
        fs::write(&short, b"lm").unwrap();
        assert!(check_model_header(&short).is_err());
    }
}
