//! Duration predictor
//!
//! A lighter transformer over the reference mel and the full character
//! sequence that regresses total speech duration in seconds. Used when the
//! caller gives no explicit duration. The text side runs through the same
//! embedding stack as the flow estimator (shifted ids, sinusoidal positions,
//! ConvNeXt refinement).

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{LayerNorm, Linear, Module};

use crate::config::DurationConfig;
use crate::utils::tensor_utils::lens_to_mask;
use crate::weights::WeightMap;

use super::dit::TextEmbedding;

fn random_linear(dim_out: usize, dim_in: usize, device: &Device) -> Result<Linear> {
    let w = Tensor::randn(0.0f32, 0.02, (dim_out, dim_in), device)?;
    let b = Tensor::zeros((dim_out,), DType::F32, device)?;
    Ok(Linear::new(w, Some(b)))
}

fn layer_norm(dim: usize, device: &Device) -> Result<LayerNorm> {
    let w = Tensor::ones((dim,), DType::F32, device)?;
    let b = Tensor::zeros((dim,), DType::F32, device)?;
    Ok(LayerNorm::new(w, b, 1e-6))
}

fn softplus(x: &Tensor) -> Result<Tensor> {
    ((x.exp()? + 1.0)?).log().map_err(Into::into)
}

/// Pre-norm transformer block without time conditioning
struct DurationBlock {
    norm1: LayerNorm,
    attn: Attention,
    norm2: LayerNorm,
    ff1: Linear,
    ff2: Linear,
}

/// Plain multi-head self-attention
struct Attention {
    to_q: Linear,
    to_k: Linear,
    to_v: Linear,
    to_out: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn init_random(dim: usize, num_heads: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            to_q: random_linear(dim, dim, device)?,
            to_k: random_linear(dim, dim, device)?,
            to_v: random_linear(dim, dim, device)?,
            to_out: random_linear(dim, dim, device)?,
            num_heads,
            head_dim: dim / num_heads,
            scale: (dim as f64 / num_heads as f64).powf(-0.5),
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str, dim: usize, num_heads: usize) -> Result<Self> {
        Ok(Self {
            to_q: w.linear(&format!("{prefix}.to_q"))?,
            to_k: w.linear(&format!("{prefix}.to_k"))?,
            to_v: w.linear(&format!("{prefix}.to_v"))?,
            to_out: w.linear(&format!("{prefix}.to_out"))?,
            num_heads,
            head_dim: dim / num_heads,
            scale: (dim as f64 / num_heads as f64).powf(-0.5),
        })
    }

    /// x: (batch, seq, dim); mask: optional (batch, seq) u8 padding mask
    fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq_len, _dim) = x.dims3()?;

        let split = |t: Tensor| -> Result<Tensor> {
            t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
                .map_err(Into::into)
        };

        let q = split(self.to_q.forward(x)?)?;
        let k = split(self.to_k.forward(x)?)?;
        let v = split(self.to_v.forward(x)?)?;

        let attn = (q.matmul(&k.transpose(2, 3)?)? * self.scale)?;

        // Mask out padded keys
        let attn = match mask {
            Some(mask) => {
                let bias = ((mask.to_dtype(DType::F32)? - 1.0)? * 1e9)?;
                let bias = bias.reshape((batch, 1, 1, seq_len))?;
                attn.broadcast_add(&bias)?
            }
            None => attn,
        };

        let attn = candle_nn::ops::softmax(&attn, D::Minus1)?;
        let out = attn.matmul(&v)?;

        let out = out
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;
        self.to_out.forward(&out).map_err(Into::into)
    }
}

impl DurationBlock {
    fn init_random(dim: usize, heads: usize, ff_mult: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(dim, device)?,
            attn: Attention::init_random(dim, heads, device)?,
            norm2: layer_norm(dim, device)?,
            ff1: random_linear(dim * ff_mult, dim, device)?,
            ff2: random_linear(dim, dim * ff_mult, device)?,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str, dim: usize, heads: usize) -> Result<Self> {
        Ok(Self {
            norm1: w.layer_norm(&format!("{prefix}.attn_norm"), 1e-6)?,
            attn: Attention::from_weights(w, &format!("{prefix}.attn"), dim, heads)?,
            norm2: w.layer_norm(&format!("{prefix}.ff_norm"), 1e-6)?,
            ff1: w.linear(&format!("{prefix}.ff.linear1"))?,
            ff2: w.linear(&format!("{prefix}.ff.linear2"))?,
        })
    }

    fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let h = self.attn.forward(&self.norm1.forward(x)?, mask)?;
        let x = (x + h)?;
        let h = self.ff1.forward(&self.norm2.forward(&x)?)?.gelu()?;
        let h = self.ff2.forward(&h)?;
        (&x + h).map_err(Into::into)
    }
}

/// Duration predictor: (reference mel, text) -> seconds of speech
pub struct DurationPredictor {
    device: Device,
    config: DurationConfig,
    text_embed: TextEmbedding,
    input_proj: Linear,
    blocks: Vec<DurationBlock>,
    final_norm: LayerNorm,
    to_pred: Linear,
}

impl DurationPredictor {
    /// Create with random weights (tests and experiments)
    pub fn init_random(config: DurationConfig, device: &Device) -> Result<Self> {
        let blocks = (0..config.depth)
            .map(|_| DurationBlock::init_random(config.dim, config.heads, config.ff_mult, device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device: device.clone(),
            text_embed: TextEmbedding::init_random(
                config.text_num_embeds,
                config.text_dim,
                config.conv_layers,
                device,
            )?,
            input_proj: random_linear(config.dim, config.mel_dim + config.text_dim, device)?,
            blocks,
            final_norm: layer_norm(config.dim, device)?,
            to_pred: random_linear(1, config.dim, device)?,
            config,
        })
    }

    /// Load from a checkpoint
    pub fn from_weights(
        w: &WeightMap,
        prefix: &str,
        config: DurationConfig,
        device: &Device,
    ) -> Result<Self> {
        let blocks = (0..config.depth)
            .map(|i| {
                DurationBlock::from_weights(
                    w,
                    &format!("{prefix}.transformer_blocks.{i}"),
                    config.dim,
                    config.heads,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device: device.clone(),
            text_embed: TextEmbedding::from_weights(
                w,
                &format!("{prefix}.text_embed"),
                config.text_dim,
                config.conv_layers,
            )?,
            input_proj: w.linear(&format!("{prefix}.input_embed.proj"))?,
            blocks,
            final_norm: w.layer_norm(&format!("{prefix}.norm_out"), 1e-6)?,
            to_pred: w.linear(&format!("{prefix}.to_pred"))?,
            config,
        })
    }

    /// Predict total speech duration in seconds
    ///
    /// # Arguments
    /// * `mel` - Reference mel (batch, frames, mel_dim)
    /// * `text` - Full character ids, reference + generation text (batch, text_len)
    /// * `lens` - Optional valid frame counts per row; frames past a row's
    ///   length are excluded from attention and pooling
    ///
    /// # Returns
    /// * Predicted seconds (batch,)
    pub fn forward(&self, mel: &Tensor, text: &Tensor, lens: Option<&[usize]>) -> Result<Tensor> {
        let (batch, seq_len, _) = mel.dims3()?;

        let mask = match lens {
            Some(lens) => Some(lens_to_mask(lens, seq_len, &self.device)?),
            None => None,
        };

        let text_emb = self.text_embed.forward(text, seq_len, false)?;
        let h = Tensor::cat(&[mel, &text_emb], D::Minus1)?;
        let mut h = self.input_proj.forward(&h)?;

        for block in &self.blocks {
            h = block.forward(&h, mask.as_ref())?;
        }

        let h = self.final_norm.forward(&h)?;

        // Mean pool over valid frames, regress a positive scalar
        let pooled = match (&mask, lens) {
            (Some(mask), Some(lens)) => {
                let maskf = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
                let summed = h.broadcast_mul(&maskf)?.sum(1)?;
                let counts: Vec<f32> = lens.iter().map(|&l| l.max(1) as f32).collect();
                let counts = Tensor::from_vec(counts, (batch, 1), &self.device)?;
                summed.broadcast_div(&counts)?
            }
            _ => h.mean(1)?,
        };
        let pred = self.to_pred.forward(&pooled)?;
        softplus(&pred)?.squeeze(D::Minus1).map_err(Into::into)
    }

    /// Hidden dimension
    pub fn dim(&self) -> usize {
        self.config.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> DurationConfig {
        DurationConfig {
            dim: 64,
            depth: 2,
            heads: 4,
            ff_mult: 2,
            text_dim: 32,
            conv_layers: 1,
            mel_dim: 100,
            text_num_embeds: 30,
        }
    }

    #[test]
    fn test_softplus_positive() {
        let device = Device::Cpu;
        let x = Tensor::new(&[-10.0f32, 0.0, 10.0], &device).unwrap();
        let y: Vec<f32> = softplus(&x).unwrap().to_vec1().unwrap();

        assert!(y.iter().all(|&v| v > 0.0));
        // softplus(0) = ln 2
        assert!((y[1] - 0.6931).abs() < 1e-3);
    }

    #[test]
    fn test_duration_forward_shape() {
        let device = Device::Cpu;
        let dp = DurationPredictor::init_random(small_config(), &device).unwrap();

        let mel = Tensor::randn(0.0f32, 1.0, (2, 20, 100), &device).unwrap();
        let text = Tensor::new(&[[1i64, 2, 3], [4, 5, -1]], &device).unwrap();

        let secs = dp.forward(&mel, &text, None).unwrap();
        assert_eq!(secs.dims(), &[2]);

        let vals: Vec<f32> = secs.to_vec1().unwrap();
        assert!(vals.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_duration_text_longer_than_mel() {
        let device = Device::Cpu;
        let dp = DurationPredictor::init_random(small_config(), &device).unwrap();

        let mel = Tensor::randn(0.0f32, 1.0, (1, 4, 100), &device).unwrap();
        let text = Tensor::new(&[[1i64, 2, 3, 4, 5, 6, 7, 8]], &device).unwrap();

        // Text axis is truncated to the mel length
        let secs = dp.forward(&mel, &text, None).unwrap();
        assert_eq!(secs.dims(), &[1]);
    }

    #[test]
    fn test_padded_frames_do_not_affect_prediction() {
        let device = Device::Cpu;
        let dp = DurationPredictor::init_random(small_config(), &device).unwrap();

        let text = Tensor::new(&[[1i64, 2]], &device).unwrap();
        let mel = Tensor::randn(0.0f32, 1.0, (1, 8, 100), &device).unwrap();

        // Same first 4 frames, different tail
        let head = mel.narrow(1, 0, 4).unwrap();
        let tail = Tensor::randn(0.0f32, 1.0, (1, 4, 100), &device).unwrap();
        let altered = Tensor::cat(&[&head, &tail], 1).unwrap();

        let a: f32 = dp
            .forward(&mel, &text, Some(&[4]))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0];
        let b: f32 = dp
            .forward(&altered, &text, Some(&[4]))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0];

        assert!((a - b).abs() < 1e-5);
    }
}
