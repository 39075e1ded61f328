use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::process::run_tool;

/// Target sample rate for whisper.cpp.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Maximum audio duration in seconds (8 hours).
/// 8 hours at 16kHz mono f32 = ~1.8 GB.
const MAX_AUDIO_DURATION_SECS: f64 = 8.0 * 3600.0;

/// Ask ffprobe for the container duration of `path`, in seconds.
pub async fn probe_duration(ffprobe: &Path, path: &Path, timeout: Duration) -> Result<f64> {
    let args = vec![
        OsString::from("-v"),
        OsString::from("error"),
        OsString::from("-show_entries"),
        OsString::from("format=duration"),
        OsString::from("-of"),
        OsString::from("default=noprint_wrappers=1:nokey=1"),
        path.as_os_str().to_owned(),
    ];
    let output = run_tool(ffprobe, &args, timeout)
        .await
        .map_err(|e| std::io::Error::other(format!("could not probe {}: {e}", path.display())))?;

    let duration = parse_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        std::io::Error::other(format!(
            "ffprobe reported no duration for {}",
            path.display()
        ))
    })?;
    debug!(path = %path.display(), duration_secs = format!("{duration:.2}"), "probed audio");
    Ok(duration)
}

/// Decode any audio file to 16kHz mono signed 16-bit little-endian PCM at `out`.
///
/// ffmpeg handles decoding, resampling, and channel mixing in one shot.
pub async fn convert_for_recognizer(
    ffmpeg: &Path,
    input: &Path,
    out: &Path,
    timeout: Duration,
) -> Result<()> {
    info!(path = %input.display(), "converting audio for recognition");

    let mut args = vec![
        OsString::from("-nostdin"),
        OsString::from("-y"),
        OsString::from("-threads"),
        OsString::from("0"),
        OsString::from("-i"),
    ];
    args.push(input.as_os_str().to_owned());
    args.extend(["-ac", "1", "-ar"].map(OsString::from));
    args.push(OsString::from(WHISPER_SAMPLE_RATE.to_string()));
    args.extend(["-f", "s16le", "-acodec", "pcm_s16le"].map(OsString::from));
    args.push(out.as_os_str().to_owned());

    run_tool(ffmpeg, &args, timeout)
        .await
        .map_err(|e| Error::Transcription(format!("audio conversion failed: {e}")))?;
    crate::process::ensure_output(out)
        .map_err(|e| Error::Transcription(format!("audio conversion failed: {e}")))?;
    Ok(())
}

/// Read raw s16le PCM and convert it to f32 samples normalized to [-1.0, 1.0].
pub fn read_pcm_s16le(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    let samples = pcm_to_f32(&bytes);

    let duration = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;
    if duration > MAX_AUDIO_DURATION_SECS {
        return Err(Error::Transcription(format!(
            "audio too long ({duration:.0}s), maximum supported duration is {MAX_AUDIO_DURATION_SECS:.0}s"
        )));
    }
    debug!(
        samples = samples.len(),
        duration_secs = format!("{duration:.1}"),
        "decoded audio"
    );
    Ok(samples)
}

fn pcm_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}
