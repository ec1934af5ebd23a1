//! Vocos vocoder
//!
//! Mel-to-waveform decoder matched to the 24 kHz / 100-band front end
//! (`lucasnewman/vocos-mel-24khz`). A stack of ConvNeXt blocks refines the
//! mel frames; the ISTFT head predicts magnitude and phase per frame and the
//! waveform is reconstructed by windowed overlap-add.

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, LayerNorm, Linear, Module};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

use crate::weights::WeightMap;

/// Vocos configuration
#[derive(Debug, Clone)]
pub struct VocosConfig {
    /// Input mel bands
    pub n_mels: usize,
    /// Backbone width
    pub dim: usize,
    /// ConvNeXt pointwise expansion width
    pub intermediate_dim: usize,
    /// Number of ConvNeXt blocks
    pub num_layers: usize,
    /// ISTFT size
    pub n_fft: usize,
    /// ISTFT hop
    pub hop_length: usize,
    /// Output sample rate
    pub sample_rate: u32,
}

impl Default for VocosConfig {
    fn default() -> Self {
        Self {
            n_mels: 100,
            dim: 512,
            intermediate_dim: 1536,
            num_layers: 8,
            n_fft: 1024,
            hop_length: 256,
            sample_rate: 24_000,
        }
    }
}

fn random_linear(dim_out: usize, dim_in: usize, device: &Device) -> Result<Linear> {
    let w = Tensor::randn(0.0f32, 0.02, (dim_out, dim_in), device)?;
    let b = Tensor::zeros((dim_out,), DType::F32, device)?;
    Ok(Linear::new(w, Some(b)))
}

fn identity_layer_norm(dim: usize, device: &Device) -> Result<LayerNorm> {
    let w = Tensor::ones((dim,), DType::F32, device)?;
    let b = Tensor::zeros((dim,), DType::F32, device)?;
    Ok(LayerNorm::new(w, b, 1e-6))
}

/// ConvNeXt block with layer scale
struct ConvNeXtBlock {
    dwconv: Conv1d,
    norm: LayerNorm,
    pwconv1: Linear,
    pwconv2: Linear,
    /// Layer scale, (dim,)
    gamma: Tensor,
}

impl ConvNeXtBlock {
    fn conv_config(dim: usize) -> Conv1dConfig {
        Conv1dConfig {
            padding: 3,
            groups: dim,
            ..Default::default()
        }
    }

    fn init_random(dim: usize, intermediate_dim: usize, device: &Device) -> Result<Self> {
        let w = Tensor::randn(0.0f32, 0.02, (dim, 1, 7), device)?;
        let b = Tensor::zeros((dim,), DType::F32, device)?;
        Ok(Self {
            dwconv: Conv1d::new(w, Some(b), Self::conv_config(dim)),
            norm: identity_layer_norm(dim, device)?,
            pwconv1: random_linear(intermediate_dim, dim, device)?,
            pwconv2: random_linear(dim, intermediate_dim, device)?,
            gamma: Tensor::full(1e-6f32, (dim,), device)?,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str, dim: usize) -> Result<Self> {
        Ok(Self {
            dwconv: w.conv1d(&format!("{prefix}.dwconv"), Self::conv_config(dim))?,
            norm: w.layer_norm(&format!("{prefix}.norm"), 1e-6)?,
            pwconv1: w.linear(&format!("{prefix}.pwconv1"))?,
            pwconv2: w.linear(&format!("{prefix}.pwconv2"))?,
            gamma: w.get(&format!("{prefix}.gamma"))?.to_dtype(DType::F32)?,
        })
    }

    /// x: (batch, frames, dim)
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let residual = x.clone();
        let h = self.dwconv.forward(&x.transpose(1, 2)?.contiguous()?)?;
        let h = h.transpose(1, 2)?;
        let h = self.norm.forward(&h)?;
        let h = self.pwconv1.forward(&h)?.gelu_erf()?;
        let h = self.pwconv2.forward(&h)?;
        let h = h.broadcast_mul(&self.gamma)?;
        (residual + h).map_err(Into::into)
    }
}

/// Vocos mel decoder
pub struct Vocos {
    device: Device,
    config: VocosConfig,
    embed: Conv1d,
    norm: LayerNorm,
    blocks: Vec<ConvNeXtBlock>,
    final_norm: LayerNorm,
    /// ISTFT head: dim -> n_fft + 2 (magnitude and phase per bin)
    head: Linear,
    window: Vec<f32>,
}

impl Vocos {
    /// Create with random weights (tests and experiments)
    pub fn init_random(config: VocosConfig, device: &Device) -> Result<Self> {
        let w = Tensor::randn(0.0f32, 0.02, (config.dim, config.n_mels, 7), device)?;
        let b = Tensor::zeros((config.dim,), DType::F32, device)?;
        let embed = Conv1d::new(
            w,
            Some(b),
            Conv1dConfig {
                padding: 3,
                ..Default::default()
            },
        );

        let blocks = (0..config.num_layers)
            .map(|_| ConvNeXtBlock::init_random(config.dim, config.intermediate_dim, device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device: device.clone(),
            embed,
            norm: identity_layer_norm(config.dim, device)?,
            blocks,
            final_norm: identity_layer_norm(config.dim, device)?,
            head: random_linear(config.n_fft + 2, config.dim, device)?,
            window: hann_window(config.n_fft),
            config,
        })
    }

    /// Load from a safetensors checkpoint
    pub fn from_weights(w: &WeightMap, config: VocosConfig, device: &Device) -> Result<Self> {
        let blocks = (0..config.num_layers)
            .map(|i| ConvNeXtBlock::from_weights(w, &format!("backbone.convnext.{i}"), config.dim))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device: device.clone(),
            embed: w.conv1d(
                "backbone.embed",
                Conv1dConfig {
                    padding: 3,
                    ..Default::default()
                },
            )?,
            norm: w.layer_norm("backbone.norm", 1e-6)?,
            blocks,
            final_norm: w.layer_norm("backbone.final_layer_norm", 1e-6)?,
            head: w.linear("head.out")?,
            window: hann_window(config.n_fft),
            config,
        })
    }

    /// Fetch and load the published vocoder
    pub fn from_pretrained(name_or_path: &str, device: &Device) -> Result<Self> {
        let path = crate::hub::fetch_vocoder(name_or_path)?;
        let weights = WeightMap::load(&path, device, None)?;
        Self::from_weights(&weights, VocosConfig::default(), device)
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Decode mel frames to a waveform
    ///
    /// # Arguments
    /// * `mel` - Log-mel spectrogram (batch, frames, n_mels)
    ///
    /// # Returns
    /// * Waveform (batch, samples) with samples = frames * hop_length
    pub fn decode(&self, mel: &Tensor) -> Result<Tensor> {
        let (batch, frames, _mels) = mel.dims3()?;

        // Backbone runs channels-first through the embed conv
        let h = self.embed.forward(&mel.transpose(1, 2)?.contiguous()?)?;
        let mut h = self.norm.forward(&h.transpose(1, 2)?)?;

        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        let h = self.final_norm.forward(&h)?;

        // Head: per-frame magnitude and phase
        let spec = self.head.forward(&h)?;
        let n_bins = self.config.n_fft / 2 + 1;
        let log_mag = spec.narrow(D::Minus1, 0, n_bins)?;
        let phase = spec.narrow(D::Minus1, n_bins, n_bins)?;

        // exp can overflow; saturate well above any magnitude a trained
        // head produces
        let mag = log_mag.exp()?.clamp(0f32, 1e2f32)?;

        let mag_v: Vec<f32> = mag.flatten_all()?.to_vec1()?;
        let phase_v: Vec<f32> = phase.flatten_all()?.to_vec1()?;

        let mut out = Vec::with_capacity(batch);
        for b in 0..batch {
            let offset = b * frames * n_bins;
            let audio = self.istft(
                &mag_v[offset..offset + frames * n_bins],
                &phase_v[offset..offset + frames * n_bins],
                frames,
            )?;
            out.push(Tensor::from_vec(audio, (1, frames * self.config.hop_length), &self.device)?);
        }

        Tensor::cat(&out, 0).map_err(Into::into)
    }

    /// Inverse STFT with windowed overlap-add and envelope normalization
    fn istft(&self, mag: &[f32], phase: &[f32], frames: usize) -> Result<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_bins = n_fft / 2 + 1;

        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(n_fft);

        let total = (frames - 1) * hop + n_fft;
        let mut audio = vec![0f32; total];
        let mut envelope = vec![0f32; total];

        let mut buf = vec![Complex::new(0f32, 0f32); n_fft];
        for f in 0..frames {
            // Hermitian-symmetric spectrum from the half-spectrum
            for k in 0..n_bins {
                let m = mag[f * n_bins + k];
                let p = phase[f * n_bins + k];
                buf[k] = Complex::new(m * p.cos(), m * p.sin());
            }
            for k in n_bins..n_fft {
                buf[k] = buf[n_fft - k].conj();
            }

            ifft.process(&mut buf);

            let start = f * hop;
            for i in 0..n_fft {
                // rustfft leaves the inverse unscaled
                let sample = buf[i].re / n_fft as f32;
                audio[start + i] += sample * self.window[i];
                envelope[start + i] += self.window[i] * self.window[i];
            }
        }

        for (a, &e) in audio.iter_mut().zip(envelope.iter()) {
            if e > 1e-11 {
                *a /= e;
            }
        }

        // Trim the centering pad so output aligns frame-for-frame with the mel
        let pad = (n_fft - hop) / 2;
        let wanted = frames * hop;
        let audio = audio
            .into_iter()
            .skip(pad)
            .take(wanted)
            .collect::<Vec<f32>>();

        // Final frames may under-run when frames is tiny
        let mut audio = audio;
        audio.resize(wanted, 0.0);
        Ok(audio)
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}
