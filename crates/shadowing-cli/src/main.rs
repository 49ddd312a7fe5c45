use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shadowing_speech::{
    Backend, BackendKind, BatchAssembler, LoopMode, PlaybackEvent, PlaybackSequencer,
    ResponseCache, SequencerOptions, ShadowingConfig, split_sentences, synthesizer_from_config,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "shadowing")]
#[command(about = "Shadowing practice - play and export passages sentence by sentence", long_about = None)]
struct Cli {
    /// Path to a JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured audio backend
    #[arg(short, long, global = true, value_enum)]
    backend: Option<BackendArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    OnDevice,
    OneShot,
    Streaming,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::OnDevice => BackendKind::OnDevice,
            BackendArg::OneShot => BackendKind::OneShot,
            BackendArg::Streaming => BackendKind::Streaming,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sentences a passage is split into
    Split {
        /// Text file holding the passage
        file: PathBuf,
    },
    /// Play a passage sentence by sentence
    Speak {
        /// Text file holding the passage
        file: PathBuf,

        /// Sentence to start from (0-based)
        #[arg(short, long, default_value = "0")]
        start: usize,

        /// Repeat the start sentence until interrupted
        #[arg(short, long = "loop")]
        repeat: bool,
    },
    /// Synthesize a whole passage into one audio file
    Export {
        /// Text file holding the passage
        file: PathBuf,

        /// Destination file (.wav for PCM backends, .mp3 for MP3)
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove cached audio, for everything or for one passage
    Clear {
        /// Only remove the sentences of this passage
        #[arg(short, long)]
        passage: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.backend)?;

    match cli.command {
        Commands::Split { file } => {
            let passage = read_passage(&file)?;
            for (index, sentence) in split_sentences(&passage).iter().enumerate() {
                println!("{:>3}  {}", index, sentence);
            }
        }
        Commands::Speak {
            file,
            start,
            repeat,
        } => {
            speak(&config, &file, start, repeat).await?;
        }
        Commands::Export { file, output } => {
            export(&config, &file, &output).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear { passage } => clear_cache(&config, passage.as_deref())?,
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>, backend: Option<BackendArg>) -> Result<ShadowingConfig> {
    let mut config = match path {
        Some(path) => {
            log::info!("Loading settings from {:?}", path);
            ShadowingConfig::from_json_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?
        }
        None => ShadowingConfig::default(),
    };
    config.apply_env();
    if let Some(backend) = backend {
        config.backend = backend.into();
    }
    config.validate().context("Invalid settings")?;
    Ok(config)
}

fn read_passage(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read passage from {}", path.display()))
}

fn open_cache(config: &ShadowingConfig) -> Option<Arc<ResponseCache>> {
    if !config.cache.enabled || config.backend == BackendKind::OnDevice {
        return None;
    }
    let cache = match config.cache.resolved_path() {
        Some(path) => ResponseCache::open(path),
        None => ResponseCache::in_memory(),
    };
    Some(Arc::new(cache))
}

async fn speak(config: &ShadowingConfig, file: &Path, start: usize, repeat: bool) -> Result<()> {
    let passage = read_passage(file)?;
    let backend = Backend::with_default_sink(config, open_cache(config))?;
    let sequencer = PlaybackSequencer::new(backend, SequencerOptions::from_config(config));
    let mut events = sequencer.events();

    sequencer.load_passage(&passage);
    let count = sequencer.snapshot().sentence_count;
    if count == 0 {
        anyhow::bail!("{} contains no sentences", file.display());
    }
    if start > 0 && !sequencer.seek(start) {
        anyhow::bail!("--start {} is out of range; the passage has {} sentences", start, count);
    }
    if repeat {
        sequencer.set_loop_mode(LoopMode::RepeatCurrent);
    }

    let sentences = split_sentences(&passage);
    sequencer.play();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PlaybackEvent::SentenceStarted { index }) => {
                    let sentence = sentences.get(index).map(String::as_str).unwrap_or_default();
                    println!("[{}/{}] {}", index + 1, count, sentence);
                }
                Ok(PlaybackEvent::SentenceFinished { index }) => {
                    log::debug!("Finished sentence {}", index);
                }
                Ok(PlaybackEvent::Error { index, backend, error }) => {
                    return Err(error).with_context(|| {
                        format!("Sentence {} failed on the {} backend", index + 1, backend)
                    });
                }
                Ok(PlaybackEvent::Finished) => break,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Skipped {} playback events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                sequencer.stop();
                println!();
                break;
            }
        }
    }

    Ok(())
}

async fn export(config: &ShadowingConfig, file: &Path, output: &Path) -> Result<()> {
    let passage = read_passage(file)?;
    let sentences = split_sentences(&passage);
    let synthesizer = synthesizer_from_config(config, open_cache(config))?;
    let batch = BatchAssembler::new(synthesizer);

    let payload = batch
        .synthesize_all_with_progress(&sentences, &config.voice, config.speed, |step, total| {
            eprintln!("Synthesizing sentence {}/{}", step, total);
        })
        .await
        .context("Export failed")?;

    let extension = payload.encoding.file_extension();
    if output.extension().and_then(|ext| ext.to_str()) != Some(extension) {
        log::warn!(
            "{} backend produces {} audio; {} may be mislabeled",
            config.backend,
            extension,
            output.display()
        );
    }

    let artifact = payload.into_artifact();
    std::fs::write(output, &artifact.bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} bytes of {} to {}",
        artifact.bytes.len(),
        artifact.mime_type,
        output.display()
    );
    Ok(())
}

fn clear_cache(config: &ShadowingConfig, passage: Option<&Path>) -> Result<()> {
    let path = config
        .cache
        .resolved_path()
        .context("No cache directory is available on this platform")?;
    let cache = ResponseCache::open(&path);

    match passage {
        Some(file) => {
            let removed = cache.clear_by_source_text(&read_passage(file)?);
            println!("Removed {} cached sentences", removed);
        }
        None => {
            cache.clear_all();
            println!("Cleared {}", path.display());
        }
    }
    Ok(())
}
