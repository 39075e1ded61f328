use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use karaoke::{
    Background, KaraokeConfig, KaraokeRequest, Language, ModelTier, Pipeline, RunState,
    SeparationStrategy, SubtitleFormat,
};

#[derive(Parser)]
#[command(name = "karaoke", about = "Turn a song into a karaoke video")]
struct Cli {
    /// Audio file to convert (.mp3, .mp4 or .m4a).
    #[arg(required_unless_present_any = ["list_models", "download_model", "list_languages"])]
    input: Option<PathBuf>,

    /// TOML config file; command line flags override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the video (default: derived from title and artist).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Language code (e.g. "en", "pt") or "auto" for detection.
    #[arg(short, long)]
    language: Option<String>,

    /// Song title shown at the start of the video.
    #[arg(long)]
    title: Option<String>,

    /// Artist shown next to the title.
    #[arg(long)]
    artist: Option<String>,

    /// Vocal separation strategy.
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Fall back to phase cancellation if the stem separator fails.
    #[arg(long)]
    fallback_spectral: bool,

    /// Subtitle format burned into the video.
    #[arg(short, long)]
    format: Option<Format>,

    /// Still image to use as background.
    #[arg(long, conflicts_with = "waveform")]
    background_image: Option<PathBuf>,

    /// Animated waveform background.
    #[arg(long)]
    waveform: bool,

    /// Background or waveform colour.
    #[arg(long)]
    color: Option<String>,

    /// Directory containing ggml-*.bin whisper models.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Explicit whisper model file (skips the tier search).
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Directory for intermediate files.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Disable GPU acceleration.
    #[arg(long)]
    no_gpu: bool,

    /// Number of threads (default: auto).
    #[arg(long)]
    threads: Option<u32>,

    /// Beam search size (default: greedy).
    #[arg(long)]
    beam_size: Option<u32>,

    /// Also write the recognized lyrics as JSON.
    #[arg(long)]
    transcript_out: Option<PathBuf>,

    /// Print the recognized lyrics to stdout.
    #[arg(long)]
    print_lyrics: bool,

    /// List available models.
    #[arg(long)]
    list_models: bool,

    /// Download a model and exit.
    #[arg(long)]
    download_model: Option<String>,

    /// List supported languages.
    #[arg(long)]
    list_languages: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// ffmpeg phase cancellation (no model needed).
    Spectral,
    /// demucs stem separation.
    Demucs,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Ass,
    Srt,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "karaoke=info"
                    .parse()
                    .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list_languages {
        println!("{:<6} {}", "CODE", "LANGUAGE");
        println!("{:<6} {}", "----", "--------");
        for (code, name) in Language::supported() {
            println!("{code:<6} {name}");
        }
        return;
    }

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => fail(e),
    };

    if cli.list_models {
        println!("{:<16} {}", "MODEL", "SIZE");
        println!("{:<16} {}", "-----", "----");
        for tier in ModelTier::ALL {
            println!("{:<16} {}", tier.name(), tier.size_hint());
        }

        let model_dir = config.transcription.resolve_model_dir();
        let cached = karaoke::model::list_cached_models(&model_dir);
        if !cached.is_empty() {
            println!("\nInstalled models in {}:", model_dir.display());
            for path in cached {
                let size = std::fs::metadata(&path)
                    .map(|m| format_bytes(m.len()))
                    .unwrap_or_default();
                println!(
                    "  {} ({})",
                    path.file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size
                );
            }
        }
        return;
    }

    if let Some(model_name) = &cli.download_model {
        let Some(tier) = ModelTier::parse_name(model_name) else {
            eprintln!("Unknown model: {model_name}");
            eprintln!("Use --list-models to see available models");
            std::process::exit(1);
        };
        let model_dir = config.transcription.resolve_model_dir();
        match karaoke::model::ensure_model(tier, &model_dir).await {
            Ok(path) => println!("Model ready: {}", path.display()),
            Err(e) => fail(e),
        }
        return;
    }

    let Some(input) = cli.input.as_deref() else {
        eprintln!("Error: no input file given");
        std::process::exit(1);
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let observer = spinner.clone();
    let pipeline = match Pipeline::new(config) {
        Ok(p) => p.with_observer(move |run| match run.state {
            RunState::Done | RunState::Failed => observer.set_message(run.state.to_string()),
            state => observer.set_message(format!("{state}…")),
        }),
        Err(e) => fail(e),
    };

    let upload = match pipeline.accept_upload(input) {
        Ok(u) => u,
        Err(e) => {
            spinner.finish_and_clear();
            fail(e)
        }
    };

    let mut request = KaraokeRequest::new(upload);
    request.language = cli.language.clone();
    request.title = cli.title.clone();
    request.artist = cli.artist.clone();

    let result = pipeline
        .run_until(request, async {
            // Ctrl-C aborts the run and cleans up.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) => {
            spinner.finish_and_clear();
            fail(e)
        }
    };
    spinner.finish_and_clear();

    if let Some(vocal_quality) = output.run.vocal_quality {
        if vocal_quality == karaoke::VocalQuality::FullMix {
            eprintln!("Note: lyrics were transcribed from the full mix (no stem separation).");
        }
    }

    let destination = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&output.video.file_name));
    if let Err(e) = karaoke::temp::move_file(&output.video.path, &destination) {
        eprintln!(
            "Error moving video to {}: {e} (it is still at {})",
            destination.display(),
            output.video.path.display()
        );
        std::process::exit(1);
    }

    eprintln!(
        "Karaoke video ready: {} segments, language: {}",
        output.transcript.segments.len(),
        output.transcript.language,
    );
    eprintln!("Written to {}", destination.display());

    if let Some(path) = &cli.transcript_out {
        let json = match output.transcript.to_json_pretty() {
            Ok(j) => j,
            Err(e) => fail(e),
        };
        if let Err(e) = std::fs::write(path, json) {
            eprintln!("Error writing to {}: {e}", path.display());
            std::process::exit(1);
        }
        eprintln!("Transcript written to {}", path.display());
    }

    if cli.print_lyrics {
        println!("{}", output.transcript.text());
    }
}

/// Config file (or defaults) with command line overrides applied.
fn build_config(cli: &Cli) -> karaoke::Result<KaraokeConfig> {
    let mut config = KaraokeConfig::load_or_default(cli.config.as_deref())?;

    if let Some(dir) = &cli.work_dir {
        config = config.work_dir(dir.clone());
    }
    if let Some(dir) = &cli.model_dir {
        config = config.model_dir(dir.clone());
    }
    if let Some(model) = &cli.model {
        config.transcription.model_file = Some(model.clone());
    }
    if let Some(strategy) = cli.strategy {
        config = config.separation_strategy(match strategy {
            Strategy::Spectral => SeparationStrategy::SpectralCancellation,
            Strategy::Demucs => SeparationStrategy::SourceSeparation,
        });
    }
    if cli.fallback_spectral {
        config.separation.fallback_to_spectral = true;
    }
    if let Some(format) = cli.format {
        config = config.subtitle_format(match format {
            Format::Ass => SubtitleFormat::Ass,
            Format::Srt => SubtitleFormat::Srt,
        });
    }

    let color = cli.color.clone();
    if let Some(path) = &cli.background_image {
        config = config.background(Background::Image { path: path.clone() });
    } else if cli.waveform {
        config = config.background(Background::Waveform {
            color: color.unwrap_or_else(|| "white".to_string()),
        });
    } else if let Some(color) = color {
        config = config.background(Background::Solid { color });
    }

    if cli.no_gpu {
        config.transcription.gpu = false;
    }
    if cli.threads.is_some() {
        config.transcription.n_threads = cli.threads;
    }
    if cli.beam_size.is_some() {
        config.transcription.beam_size = cli.beam_size;
    }

    config.validate()?;
    Ok(config)
}

fn fail(e: karaoke::Error) -> ! {
    eprintln!("Error: {e}");
    if matches!(e, karaoke::Error::UnsupportedLanguage(_)) {
        eprintln!("Use --list-languages to see supported languages");
    }
    if matches!(e, karaoke::Error::ModelNotFound { .. }) {
        eprintln!("Use --download-model <name> to fetch one");
    }
    std::process::exit(1);
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.0} MB", bytes as f64 / 1_000_000.0)
    } else {
        format!("{:.0} KB", bytes as f64 / 1_000.0)
    }
}
