//! F5-TTS CLI - Command-line interface for voice-cloning speech synthesis

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use f5_tts::models::SolverMethod;
use f5_tts::{hub, ModelConfig, SynthesisConfig, Synthesizer, VERSION};

/// F5-TTS - Zero-shot voice cloning with conditional flow matching
#[derive(Parser, Debug)]
#[command(name = "f5-tts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use CPU even when a GPU is available
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize speech from text, cloning the voice of a reference recording
    Generate {
        /// Text to synthesize
        #[arg(short, long)]
        text: String,

        /// Path to reference audio (WAV)
        #[arg(short, long)]
        ref_audio: PathBuf,

        /// Transcript of the reference audio
        #[arg(long)]
        ref_text: String,

        /// Output audio file path
        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,

        /// Model repo name or local checkpoint directory
        #[arg(short, long, default_value = hub::DEFAULT_MODEL_REPO)]
        model: String,

        /// Quantization bits (4 or 8); inferred from the model name if omitted
        #[arg(short, long)]
        quantization_bits: Option<usize>,

        /// Number of ODE steps
        #[arg(long, default_value = "32")]
        steps: usize,

        /// ODE solver (euler or midpoint)
        #[arg(long, default_value = "euler")]
        method: SolverMethod,

        /// Classifier-free guidance strength
        #[arg(long, default_value = "2.0")]
        cfg_strength: f32,

        /// Sway sampling coefficient
        #[arg(long, default_value = "-1.0", allow_negative_numbers = true)]
        sway_coef: f32,

        /// Speech rate (higher is faster)
        #[arg(long, default_value = "1.0")]
        speed: f32,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Duration of the generated audio in seconds (skips the duration
        /// predictor)
        #[arg(short, long)]
        duration: Option<f32>,
    },

    /// Download model weights from HuggingFace
    Download {
        /// Model repo name
        #[arg(short, long, default_value = hub::DEFAULT_MODEL_REPO)]
        model: String,
    },

    /// Show model configuration
    Info {
        /// Local checkpoint directory (prints defaults when omitted)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("F5-TTS v{}", VERSION);

    let device = if cli.cpu {
        candle_core::Device::Cpu
    } else {
        candle_core::Device::cuda_if_available(0)?
    };

    match cli.command {
        Commands::Generate {
            text,
            ref_audio,
            ref_text,
            output,
            model,
            quantization_bits,
            steps,
            method,
            cfg_strength,
            sway_coef,
            speed,
            seed,
            duration,
        } => {
            let pb = create_progress_bar("Loading model...");
            let synth = Synthesizer::from_pretrained(&model, quantization_bits, &device)
                .with_context(|| format!("Failed to load model {}", model))?;
            pb.finish_with_message("Model loaded");

            let config = SynthesisConfig {
                steps,
                method,
                cfg_strength,
                sway_sampling_coef: Some(sway_coef),
                speed,
                seed,
                duration_secs: duration,
                ..Default::default()
            };

            let pb = create_progress_bar("Generating speech...");
            let result = synth.synthesize_with(&text, &ref_audio, &ref_text, &config)?;
            pb.finish_with_message(format!(
                "Generated {:.2}s of audio",
                result.duration()
            ));

            result.save(&output)?;
            info!("Saved to {:?}", output);

            Ok(())
        }

        Commands::Download { model } => {
            let pb = create_progress_bar("Downloading model files...");
            let files = hub::fetch_model(&model)?;
            let vocoder = hub::fetch_vocoder(hub::VOCOS_REPO)?;
            pb.finish_with_message("Download complete");

            println!("model:    {:?}", files.model);
            println!("vocab:    {:?}", files.vocab);
            if let Some(d) = &files.duration {
                println!("duration: {:?}", d);
            }
            if let Some(c) = &files.config {
                println!("config:   {:?}", c);
            }
            println!("vocoder:  {:?}", vocoder);

            Ok(())
        }

        Commands::Info { path } => {
            let config = match &path {
                Some(dir) => ModelConfig::load_or_default(dir)
                    .with_context(|| format!("Failed to read config from {:?}", dir))?,
                None => ModelConfig::default(),
            };
            println!("{:#?}", config);
            Ok(())
        }
    }
}
