//! # F5-TTS
//!
//! A Rust implementation of F5-TTS, a non-autoregressive text-to-speech
//! system based on conditional flow matching with a diffusion transformer.
//!
//! ## Features
//!
//! - Zero-shot voice cloning from a short reference recording
//! - Euler / midpoint ODE solvers with sway sampling
//! - Classifier-free guidance
//! - Native Vocos vocoder (mel to 24 kHz waveform)
//! - Loading of 4-bit / 8-bit quantized checkpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use candle_core::Device;
//! use f5_tts::Synthesizer;
//!
//! let tts = Synthesizer::from_pretrained("lucasnewman/f5-tts-mlx", None, &Device::Cpu)?;
//! let audio = tts.synthesize("Hello, world!", "voice.wav", "Reference transcript.")?;
//! audio.save("output.wav")?;
//! ```

// Allow dead code for infrastructure that may be used in the future
#![allow(dead_code)]
// Require docs for public items, but not struct fields (too verbose)
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod audio;
pub mod config;
pub mod hub;
pub mod inference;
pub mod models;
pub mod text;
pub mod utils;
pub mod weights;

// Re-exports for convenience
pub use config::ModelConfig;
pub use inference::{SynthesisConfig, SynthesisResult, Synthesizer};
pub use models::F5Tts;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Model sample rate (24 kHz)
pub const SAMPLE_RATE: u32 = 24_000;

/// Mel spectrogram hop length
pub const HOP_LENGTH: usize = 256;

/// Number of mel bands
pub const N_MELS: usize = 100;

/// Hard cap on generated mel frames
pub const MAX_DURATION_FRAMES: usize = 4096;
