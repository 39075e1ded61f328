//! Upload boundary: validating and staging incoming audio, naming the result.

use std::io::Write;
use std::path::Path;

use tracing::info;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};
use crate::temp::{TempArtifact, TempManager};

/// Accepted upload extensions (compared case-insensitively).
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["mp3", "mp4", "m4a"];

/// Characters that cannot appear in a download file name.
const FORBIDDEN_NAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Lowercased extension of an acceptable upload name.
pub fn validate_name(file_name: &str) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(Error::InvalidInput(format!(
            "\"{file_name}\" is not an MP3, MP4 or M4A file"
        )))
    }
}

/// Copy a local file into the work directory under a fresh token name.
pub fn accept_file(temp: &TempManager, source: &Path) -> Result<TempArtifact> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = validate_name(&name)?;

    let meta = std::fs::metadata(source)
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {e}", source.display())))?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(Error::InvalidInput(format!("{} is empty", source.display())));
    }

    let staged = temp.allocate(&format!(".{ext}"))?;
    std::fs::copy(source, staged.path())?;
    info!(source = %source.display(), staged = %staged.path().display(), "upload staged");
    Ok(staged)
}

/// Stage an upload received in memory.
pub fn accept_bytes(temp: &TempManager, file_name: &str, bytes: &[u8]) -> Result<TempArtifact> {
    let ext = validate_name(file_name)?;
    if bytes.is_empty() {
        return Err(Error::InvalidInput(format!("\"{file_name}\" is empty")));
    }

    let staged = temp.allocate(&format!(".{ext}"))?;
    let mut file = std::fs::File::create(staged.path())?;
    file.write_all(bytes)?;
    file.flush()?;
    info!(size = bytes.len(), staged = %staged.path().display(), "upload staged");
    Ok(staged)
}

/// Strip accents, lowercase and join words with hyphens: `"Coração Valente"`
/// becomes `"coracao-valente"`.
pub fn normalize_text(input: &str) -> String {
    let stripped: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c))
        .nfc()
        .collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Download name for a finished video.
///
/// Falls back to the generated video's own file name when title and artist
/// are both blank.
pub fn download_name(title: Option<&str>, artist: Option<&str>, video: &Path) -> String {
    let parts: Vec<String> = [title, artist]
        .into_iter()
        .flatten()
        .map(normalize_text)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        return video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "karaoke.mp4".to_string());
    }
    format!("{}.mp4", parts.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("song.mp3").unwrap(), "mp3");
        assert_eq!(validate_name("Clip.MP4").unwrap(), "mp4");
        assert_eq!(validate_name("track.M4a").unwrap(), "m4a");
        assert!(matches!(validate_name("notes.txt"), Err(Error::InvalidInput(_))));
        assert!(validate_name("noextension").is_err());
        assert!(validate_name("song.mp3.exe").is_err());
    }

    #[test]
    fn test_accept_bytes_rejects_before_allocating() {
        let tmp = tempfile::tempdir().unwrap();
        let temp = TempManager::new(tmp.path()).unwrap();

        assert!(accept_bytes(&temp, "song.wav", b"data").is_err());
        assert!(accept_bytes(&temp, "song.mp3", b"").is_err());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_accept_bytes_uses_token_name() {
        let tmp = tempfile::tempdir().unwrap();
        let temp = TempManager::new(tmp.path()).unwrap();

        let staged = accept_bytes(&temp, "My Song.MP3", b"ID3").unwrap();
        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.contains("My Song"));
        assert!(name.ends_with(".mp3"));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"ID3");
    }

    #[test]
    fn test_accept_file() {
        let tmp = tempfile::tempdir().unwrap();
        let temp = TempManager::new(tmp.path().join("work")).unwrap();
        let source = tmp.path().join("upload.m4a");
        std::fs::write(&source, b"ftyp").unwrap();

        let staged = accept_file(&temp, &source).unwrap();
        assert!(staged.path().starts_with(temp.root()));
        assert!(source.exists());
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"ftyp");
    }

    #[test]
    fn test_accept_file_empty_or_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let temp = TempManager::new(tmp.path().join("work")).unwrap();
        let empty = tmp.path().join("empty.mp3");
        std::fs::write(&empty, b"").unwrap();

        assert!(matches!(accept_file(&temp, &empty), Err(Error::InvalidInput(_))));
        assert!(matches!(
            accept_file(&temp, &tmp.path().join("missing.mp3")),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(std::fs::read_dir(temp.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Coração Valente"), "coracao-valente");
        assert_eq!(normalize_text("  Águas de Março "), "aguas-de-marco");
        assert_eq!(normalize_text("AC/DC"), "acdc");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_download_name_from_title_and_artist() {
        let video = Path::new("/work/3f2a.mp4");
        assert_eq!(
            download_name(Some("Garota de Ipanema"), Some("Tom Jobim"), video),
            "garota-de-ipanema-tom-jobim.mp4"
        );
        assert_eq!(download_name(Some("Só Title"), None, video), "so-title.mp4");
        assert_eq!(download_name(Some(" "), Some("Artist"), video), "artist.mp4");
    }

    #[test]
    fn test_download_name_blank_uses_video_name() {
        let video = Path::new("/work/3f2a9c.mp4");
        assert_eq!(download_name(Some(""), Some("   "), video), "3f2a9c.mp4");
        assert_eq!(download_name(None, None, video), "3f2a9c.mp4");
    }
}
