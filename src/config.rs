//! Model configuration
//!
//! Hyperparameters for the DiT flow estimator, the duration predictor and the
//! mel front end. Defaults mirror the published F5-TTS base checkpoint; a
//! `config.json` placed next to the weights overrides them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Mel spectrogram parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// FFT size
    pub n_fft: usize,
    /// Hop length in samples
    pub hop_length: usize,
    /// Window length in samples
    pub win_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            n_fft: 1024,
            hop_length: 256,
            win_length: 1024,
            n_mels: 100,
        }
    }
}

impl MelConfig {
    /// Mel frames per second of audio
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_length as f32
    }
}

/// DiT flow estimator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DitConfig {
    /// Hidden dimension
    pub dim: usize,
    /// Number of transformer blocks
    pub depth: usize,
    /// Number of attention heads
    pub heads: usize,
    /// Feed-forward expansion factor
    pub ff_mult: usize,
    /// Text embedding dimension
    pub text_dim: usize,
    /// Number of ConvNeXt blocks refining the text embedding
    pub conv_layers: usize,
    /// Mel channels (input and output)
    pub mel_dim: usize,
    /// Text vocabulary size (without the shifted filler slot)
    pub text_num_embeds: usize,
}

impl Default for DitConfig {
    fn default() -> Self {
        // F5-TTS base: 1024-dim, 22 layers, 16 heads
        Self {
            dim: 1024,
            depth: 22,
            heads: 16,
            ff_mult: 2,
            text_dim: 512,
            conv_layers: 4,
            mel_dim: 100,
            text_num_embeds: 256,
        }
    }
}

/// Duration predictor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationConfig {
    /// Hidden dimension
    pub dim: usize,
    /// Number of transformer blocks
    pub depth: usize,
    /// Number of attention heads
    pub heads: usize,
    /// Feed-forward expansion factor
    pub ff_mult: usize,
    /// Text embedding dimension
    pub text_dim: usize,
    /// Number of ConvNeXt blocks refining the text embedding
    pub conv_layers: usize,
    /// Mel channels
    pub mel_dim: usize,
    /// Text vocabulary size
    pub text_num_embeds: usize,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            dim: 512,
            depth: 8,
            heads: 8,
            ff_mult: 2,
            text_dim: 512,
            conv_layers: 2,
            mel_dim: 100,
            text_num_embeds: 256,
        }
    }
}

/// Top-level model configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Mel front end
    pub mel: MelConfig,
    /// Flow estimator
    pub dit: DitConfig,
    /// Duration predictor
    pub duration: DurationConfig,
}

impl ModelConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config {:?}", path.as_ref()))?;
        serde_json::from_str(&content).context("Failed to parse model config")
    }

    /// Load `config.json` from a model directory, falling back to defaults
    pub fn load_or_default<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let path = model_dir.as_ref().join("config.json");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Set vocabulary size on both text-conditioned models
    pub fn with_vocab_size(mut self, size: usize) -> Self {
        self.dit.text_num_embeds = size;
        self.duration.text_num_embeds = size;
        self
    }
}
