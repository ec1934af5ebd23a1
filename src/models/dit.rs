//! Diffusion Transformer (DiT) flow estimator
//!
//! Predicts the flow-matching velocity field conditioned on:
//! - the noised mel spectrogram
//! - the masked reference mel (audio conditioning)
//! - character ids (text conditioning)
//! - the ODE timestep
//!
//! Blocks use AdaLN-Zero modulation from the timestep embedding and rotary
//! position embeddings in attention. Classifier-free guidance drops the audio
//! and text conditioning via `drop_audio_cond` / `drop_text`.

use anyhow::Result;
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Embedding, LayerNorm, Linear, Module};

use crate::config::DitConfig;
use crate::weights::WeightMap;

/// SiLU (Swish) activation
fn silu(x: &Tensor) -> Result<Tensor> {
    let sigmoid = candle_nn::ops::sigmoid(x)?;
    x.mul(&sigmoid).map_err(Into::into)
}

/// Mish activation: x * tanh(ln(1 + e^x))
fn mish(x: &Tensor) -> Result<Tensor> {
    let softplus = ((x.exp()? + 1.0)?).log()?;
    x.mul(&softplus.tanh()?).map_err(Into::into)
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

/// Sinusoidal position/timestep embedding
fn sinusoidal_embedding(positions: &Tensor, dim: usize, device: &Device) -> Result<Tensor> {
    let half_dim = dim / 2;
    let emb_scale = -(10000.0f32.ln()) / (half_dim as f32 - 1.0);

    let freqs: Vec<f32> = (0..half_dim)
        .map(|i| (i as f32 * emb_scale).exp())
        .collect();
    let freqs = Tensor::from_vec(freqs, (1, half_dim), device)?;

    let positions = positions.unsqueeze(1)?.to_dtype(DType::F32)?;
    let args = positions.broadcast_mul(&freqs)?;

    Tensor::cat(&[args.sin()?, args.cos()?], 1).map_err(Into::into)
}

/// Timestep embedding: scaled sinusoidal + 2-layer MLP
pub(crate) struct TimestepEmbedding {
    mlp1: Linear,
    mlp2: Linear,
    dim: usize,
}

impl TimestepEmbedding {
    fn init_random(dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            mlp1: random_linear(dim, dim, device)?,
            mlp2: random_linear(dim, dim, device)?,
            dim,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str, dim: usize) -> Result<Self> {
        Ok(Self {
            mlp1: w.linear(&format!("{prefix}.mlp1"))?,
            mlp2: w.linear(&format!("{prefix}.mlp2"))?,
            dim,
        })
    }

    fn forward(&self, t: &Tensor, device: &Device) -> Result<Tensor> {
        // The sinusoid operates on t scaled to [0, 1000]
        let scaled = (t.to_dtype(DType::F32)? * 1000.0)?;
        let emb = sinusoidal_embedding(&scaled, self.dim, device)?;
        let emb = silu(&self.mlp1.forward(&emb)?)?;
        self.mlp2.forward(&emb).map_err(Into::into)
    }
}

/// ConvNeXt-style refinement block used on the text embedding
struct TextConvBlock {
    dwconv: Conv1d,
    norm: LayerNorm,
    pwconv1: Linear,
    pwconv2: Linear,
    dim: usize,
}

impl TextConvBlock {
    fn conv_config(dim: usize) -> Conv1dConfig {
        Conv1dConfig {
            padding: 3,
            groups: dim,
            ..Default::default()
        }
    }

    fn init_random(dim: usize, device: &Device) -> Result<Self> {
        let w = Tensor::randn(0.0f32, 0.02, (dim, 1, 7), device)?;
        let b = Tensor::zeros((dim,), DType::F32, device)?;
        Ok(Self {
            dwconv: Conv1d::new(w, Some(b), Self::conv_config(dim)),
            norm: identity_layer_norm(dim, device)?,
            pwconv1: random_linear(dim * 2, dim, device)?,
            pwconv2: random_linear(dim, dim * 2, device)?,
            dim,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str, dim: usize) -> Result<Self> {
        Ok(Self {
            dwconv: w.conv1d(&format!("{prefix}.dwconv"), Self::conv_config(dim))?,
            norm: w.layer_norm(&format!("{prefix}.norm"), 1e-6)?,
            pwconv1: w.linear(&format!("{prefix}.pwconv1"))?,
            pwconv2: w.linear(&format!("{prefix}.pwconv2"))?,
            dim,
        })
    }

    /// x: (batch, seq, dim)
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let residual = x.clone();
        // Depthwise conv runs channels-first
        let h = self.dwconv.forward(&x.transpose(1, 2)?.contiguous()?)?;
        let h = h.transpose(1, 2)?;
        let h = self.norm.forward(&h)?;
        let h = self.pwconv1.forward(&h)?.gelu_erf()?;
        let h = self.pwconv2.forward(&h)?;
        (residual + h).map_err(Into::into)
    }
}

/// Character embedding with absolute positions and conv refinement
pub(crate) struct TextEmbedding {
    embed: Embedding,
    blocks: Vec<TextConvBlock>,
    text_dim: usize,
}

impl TextEmbedding {
    pub(crate) fn init_random(
        text_num_embeds: usize,
        text_dim: usize,
        conv_layers: usize,
        device: &Device,
    ) -> Result<Self> {
        // +1 row for the filler token (pad ids are shifted to 0)
        let w = Tensor::randn(0.0f32, 0.02, (text_num_embeds + 1, text_dim), device)?;
        let blocks = (0..conv_layers)
            .map(|_| TextConvBlock::init_random(text_dim, device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embed: Embedding::new(w, text_dim),
            blocks,
            text_dim,
        })
    }

    pub(crate) fn from_weights(
        w: &WeightMap,
        prefix: &str,
        text_dim: usize,
        conv_layers: usize,
    ) -> Result<Self> {
        let blocks = (0..conv_layers)
            .map(|i| TextConvBlock::from_weights(w, &format!("{prefix}.text_blocks.{i}"), text_dim))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embed: w.embedding(&format!("{prefix}.text_embed"))?,
            blocks,
            text_dim,
        })
    }

    /// text: (batch, text_len) i64 ids padded with -1; output (batch, seq_len, text_dim)
    pub(crate) fn forward(&self, text: &Tensor, seq_len: usize, drop_text: bool) -> Result<Tensor> {
        let (batch, text_len) = text.dims2()?;
        let device = text.device();

        // Shift ids so pad (-1) lands on the filler row 0; the shift runs in
        // f64 (ids are small, exactly representable) since candle's scalar
        // arithmetic is float-only
        let ids = if drop_text {
            Tensor::zeros((batch, seq_len), DType::U32, device)?
        } else {
            let shifted = (text.to_dtype(DType::F64)? + 1.0)?.maximum(0.0)?;
            let shifted = shifted.to_dtype(DType::I64)?;
            // Pad (or truncate) the text axis to the mel length with filler
            let shifted = if text_len >= seq_len {
                shifted.i((.., ..seq_len))?
            } else {
                let pad = Tensor::zeros((batch, seq_len - text_len), DType::I64, device)?;
                Tensor::cat(&[&shifted, &pad], 1)?
            };
            shifted.to_dtype(DType::U32)?
        };

        let mut h = self.embed.forward(&ids)?;

        // Absolute positions
        let positions = Tensor::arange(0u32, seq_len as u32, device)?;
        let pos_emb = sinusoidal_embedding(&positions, self.text_dim, device)?;
        h = h.broadcast_add(&pos_emb.unsqueeze(0)?)?;

        for block in &self.blocks {
            h = block.forward(&h)?;
        }

        Ok(h)
    }
}

/// Convolutional position embedding applied after the input projection
struct ConvPositionEmbedding {
    conv1: Conv1d,
    conv2: Conv1d,
}

impl ConvPositionEmbedding {
    const GROUPS: usize = 16;
    const KERNEL: usize = 31;

    fn conv_config() -> Conv1dConfig {
        Conv1dConfig {
            padding: Self::KERNEL / 2,
            groups: Self::GROUPS,
            ..Default::default()
        }
    }

    fn init_random(dim: usize, device: &Device) -> Result<Self> {
        let mk = |device: &Device| -> Result<Conv1d> {
            let w = Tensor::randn(
                0.0f32,
                0.02,
                (dim, dim / Self::GROUPS, Self::KERNEL),
                device,
            )?;
            let b = Tensor::zeros((dim,), DType::F32, device)?;
            Ok(Conv1d::new(w, Some(b), Self::conv_config()))
        };
        Ok(Self {
            conv1: mk(device)?,
            conv2: mk(device)?,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str) -> Result<Self> {
        Ok(Self {
            conv1: w.conv1d(&format!("{prefix}.conv1"), Self::conv_config())?,
            conv2: w.conv1d(&format!("{prefix}.conv2"), Self::conv_config())?,
        })
    }

    /// x: (batch, seq, dim)
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = x.transpose(1, 2)?.contiguous()?;
        let h = mish(&self.conv1.forward(&h)?)?;
        let h = mish(&self.conv2.forward(&h)?)?;
        let h = h.transpose(1, 2)?;
        (x + h).map_err(Into::into)
    }
}

/// Projects concat(noised mel, cond mel, text embedding) into the model width
struct InputEmbedding {
    proj: Linear,
    conv_pos: ConvPositionEmbedding,
}

impl InputEmbedding {
    fn init_random(mel_dim: usize, text_dim: usize, dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            proj: random_linear(dim, mel_dim * 2 + text_dim, device)?,
            conv_pos: ConvPositionEmbedding::init_random(dim, device)?,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str) -> Result<Self> {
        Ok(Self {
            proj: w.linear(&format!("{prefix}.proj"))?,
            conv_pos: ConvPositionEmbedding::from_weights(w, &format!("{prefix}.conv_pos_embed"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text_emb: &Tensor,
        drop_audio_cond: bool,
    ) -> Result<Tensor> {
        let cond = if drop_audio_cond {
            cond.zeros_like()?
        } else {
            cond.clone()
        };
        let h = Tensor::cat(&[x, &cond, text_emb], D::Minus1)?;
        let h = self.proj.forward(&h)?;
        self.conv_pos.forward(&h)
    }
}

/// Rotary position embedding over attention head dimensions
fn apply_rotary(x: &Tensor) -> Result<Tensor> {
    let (_b, _h, seq_len, head_dim) = x.dims4()?;
    let device = x.device();
    let half = head_dim / 2;

    let inv_freq: Vec<f32> = (0..half)
        .map(|i| 1.0 / 10000f32.powf(2.0 * i as f32 / head_dim as f32))
        .collect();

    let mut cos_data = vec![0f32; seq_len * half];
    let mut sin_data = vec![0f32; seq_len * half];
    for pos in 0..seq_len {
        for (i, &f) in inv_freq.iter().enumerate() {
            let angle = pos as f32 * f;
            cos_data[pos * half + i] = angle.cos();
            sin_data[pos * half + i] = angle.sin();
        }
    }
    let cos = Tensor::from_vec(cos_data, (1, 1, seq_len, half), device)?;
    let sin = Tensor::from_vec(sin_data, (1, 1, seq_len, half), device)?;

    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;

    let r1 = (x1.broadcast_mul(&cos)? - x2.broadcast_mul(&sin)?)?;
    let r2 = (x1.broadcast_mul(&sin)? + x2.broadcast_mul(&cos)?)?;
    Tensor::cat(&[r1, r2], D::Minus1).map_err(Into::into)
}

/// Multi-head self-attention with rotary positions and optional padding mask
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

        let q = apply_rotary(&split(self.to_q.forward(x)?)?)?;
        let k = apply_rotary(&split(self.to_k.forward(x)?)?)?;
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

/// Feed-forward network
struct FeedForward {
    linear1: Linear,
    linear2: Linear,
}

impl FeedForward {
    fn init_random(dim: usize, ff_mult: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            linear1: random_linear(dim * ff_mult, dim, device)?,
            linear2: random_linear(dim, dim * ff_mult, device)?,
        })
    }

    fn from_weights(w: &WeightMap, prefix: &str) -> Result<Self> {
        Ok(Self {
            linear1: w.linear(&format!("{prefix}.linear1"))?,
            linear2: w.linear(&format!("{prefix}.linear2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.linear1.forward(x)?.gelu()?;
        self.linear2.forward(&h).map_err(Into::into)
    }
}

/// shift/scale modulation shared by the AdaLN variants
fn modulate(x: &Tensor, shift: &Tensor, scale: &Tensor) -> Result<Tensor> {
    let scale = (scale + 1.0)?.unsqueeze(1)?;
    let shift = shift.unsqueeze(1)?;
    x.broadcast_mul(&scale)?
        .broadcast_add(&shift)
        .map_err(Into::into)
}

/// DiT block with AdaLN-Zero conditioning
struct DiTBlock {
    /// Projects silu(time emb) to 6 modulation chunks
    adaln: Linear,
    norm1: LayerNorm,
    attn: Attention,
    norm2: LayerNorm,
    ff: FeedForward,
}

impl DiTBlock {
    fn init_random(dim: usize, num_heads: usize, ff_mult: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            adaln: random_linear(dim * 6, dim, device)?,
            norm1: identity_layer_norm(dim, device)?,
            attn: Attention::init_random(dim, num_heads, device)?,
            norm2: identity_layer_norm(dim, device)?,
            ff: FeedForward::init_random(dim, ff_mult, device)?,
        })
    }

    fn from_weights(
        w: &WeightMap,
        prefix: &str,
        dim: usize,
        num_heads: usize,
    ) -> Result<Self> {
        // The pre-attention / pre-ff norms carry no affine parameters; the
        // AdaLN projection provides all modulation.
        let device = w.get(&format!("{prefix}.attn_norm.linear.weight"))?.device().clone();
        Ok(Self {
            adaln: w.linear(&format!("{prefix}.attn_norm.linear"))?,
            norm1: identity_layer_norm(dim, &device)?,
            attn: Attention::from_weights(w, &format!("{prefix}.attn"), dim, num_heads)?,
            norm2: identity_layer_norm(dim, &device)?,
            ff: FeedForward::from_weights(w, &format!("{prefix}.ff"))?,
        })
    }

    /// x: (batch, seq, dim); t_emb: (batch, dim)
    fn forward(&self, x: &Tensor, t_emb: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let params = self.adaln.forward(&silu(t_emb)?)?;
        let chunks = params.chunk(6, D::Minus1)?;
        let (shift_msa, scale_msa, gate_msa) = (&chunks[0], &chunks[1], &chunks[2]);
        let (shift_mlp, scale_mlp, gate_mlp) = (&chunks[3], &chunks[4], &chunks[5]);

        let h = modulate(&self.norm1.forward(x)?, shift_msa, scale_msa)?;
        let h = self.attn.forward(&h, mask)?;
        let x = (x + h.broadcast_mul(&gate_msa.unsqueeze(1)?)?)?;

        let h = modulate(&self.norm2.forward(&x)?, shift_mlp, scale_mlp)?;
        let h = self.ff.forward(&h)?;
        (&x + h.broadcast_mul(&gate_mlp.unsqueeze(1)?)?).map_err(Into::into)
    }
}

/// Diffusion transformer velocity estimator
pub struct DiT {
    device: Device,
    config: DitConfig,
    text_embed: TextEmbedding,
    input_embed: InputEmbedding,
    time_embed: TimestepEmbedding,
    blocks: Vec<DiTBlock>,
    /// Final AdaLN (scale/shift from the timestep embedding)
    norm_out_adaln: Linear,
    norm_out: LayerNorm,
    proj_out: Linear,
}

impl DiT {
    /// Create with random weights (tests and experiments)
    pub fn init_random(config: DitConfig, device: &Device) -> Result<Self> {
        let blocks = (0..config.depth)
            .map(|_| DiTBlock::init_random(config.dim, config.heads, config.ff_mult, device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device: device.clone(),
            text_embed: TextEmbedding::init_random(
                config.text_num_embeds,
                config.text_dim,
                config.conv_layers,
                device,
            )?,
            input_embed: InputEmbedding::init_random(
                config.mel_dim,
                config.text_dim,
                config.dim,
                device,
            )?,
            time_embed: TimestepEmbedding::init_random(config.dim, device)?,
            blocks,
            norm_out_adaln: random_linear(config.dim * 2, config.dim, device)?,
            norm_out: identity_layer_norm(config.dim, device)?,
            proj_out: random_linear(config.mel_dim, config.dim, device)?,
            config,
        })
    }

    /// Load from a checkpoint under the given tensor-name prefix
    pub fn from_weights(w: &WeightMap, prefix: &str, config: DitConfig, device: &Device) -> Result<Self> {
        let blocks = (0..config.depth)
            .map(|i| {
                DiTBlock::from_weights(
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
            input_embed: InputEmbedding::from_weights(w, &format!("{prefix}.input_embed"))?,
            time_embed: TimestepEmbedding::from_weights(
                w,
                &format!("{prefix}.time_embed"),
                config.dim,
            )?,
            blocks,
            norm_out_adaln: w.linear(&format!("{prefix}.norm_out.linear"))?,
            norm_out: identity_layer_norm(config.dim, device)?,
            proj_out: w.linear(&format!("{prefix}.proj_out"))?,
            config,
        })
    }

    /// Hidden dimension
    pub fn dim(&self) -> usize {
        self.config.dim
    }

    /// Mel channels in/out
    pub fn mel_dim(&self) -> usize {
        self.config.mel_dim
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Noised mel (batch, seq_len, mel_dim)
    /// * `cond` - Masked reference mel (batch, seq_len, mel_dim)
    /// * `text` - Character ids (batch, text_len), padded with -1
    /// * `time` - ODE timesteps (batch,)
    /// * `mask` - Optional (batch, seq_len) u8 padding mask
    /// * `drop_audio_cond` / `drop_text` - CFG conditioning drops
    ///
    /// # Returns
    /// * Predicted velocity (batch, seq_len, mel_dim)
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text: &Tensor,
        time: &Tensor,
        mask: Option<&Tensor>,
        drop_audio_cond: bool,
        drop_text: bool,
    ) -> Result<Tensor> {
        let (_batch, seq_len, _) = x.dims3()?;

        let t_emb = self.time_embed.forward(time, &self.device)?;
        let text_emb = self.text_embed.forward(text, seq_len, drop_text)?;
        let mut h = self
            .input_embed
            .forward(x, cond, &text_emb, drop_audio_cond)?;

        for block in &self.blocks {
            h = block.forward(&h, &t_emb, mask)?;
        }

        // Final AdaLN: scale/shift only, no gate
        let params = self.norm_out_adaln.forward(&silu(&t_emb)?)?;
        let chunks = params.chunk(2, D::Minus1)?;
        let h = modulate(&self.norm_out.forward(&h)?, &chunks[0], &chunks[1])?;

        self.proj_out.forward(&h).map_err(Into::into)
    }
}
