//! Checkpoint loading
//!
//! Loads safetensors checkpoints into named tensors and builds candle layers
//! from them. Handles two checkpoint quirks:
//!
//! - MLX stores conv1d weights as (out, kernel, in); candle expects
//!   (out, in, kernel), so conv weights are transposed at load.
//! - Quantized checkpoints store each quantized Linear as a packed u32
//!   `weight` plus per-group `scales` and `biases`. Those are dequantized to
//!   f32 here; inference then runs ordinary f32 kernels.

use anyhow::{Context, Result};
use candle_core::{safetensors, DType, Device, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Embedding, LayerNorm, Linear};
use std::collections::HashMap;
use std::path::Path;

/// Named tensors loaded from a safetensors file
pub struct WeightMap {
    tensors: HashMap<String, Tensor>,
    device: Device,
    /// Quantization bit width of packed weights, when the checkpoint is quantized
    quant_bits: Option<usize>,
}

impl WeightMap {
    /// Load all tensors from a safetensors file
    pub fn load<P: AsRef<Path>>(path: P, device: &Device, quant_bits: Option<usize>) -> Result<Self> {
        let tensors = safetensors::load(path.as_ref(), device)
            .with_context(|| format!("Failed to load weights from {:?}", path.as_ref()))?;

        Ok(Self {
            tensors,
            device: device.clone(),
            quant_bits,
        })
    }

    /// Build from an in-memory tensor map (test helper)
    pub fn from_tensors(tensors: HashMap<String, Tensor>, device: &Device) -> Self {
        Self {
            tensors,
            device: device.clone(),
            quant_bits: None,
        }
    }

    /// Whether a tensor with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Fetch a named tensor
    pub fn get(&self, name: &str) -> Result<Tensor> {
        self.tensors
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing tensor '{}' in checkpoint", name))
    }

    /// All tensor names (sorted), for diagnostics
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a Linear layer from `{prefix}.weight` / `{prefix}.bias`
    ///
    /// When the layer was quantized at export time, `{prefix}.scales` is
    /// present and the packed weight is dequantized first.
    pub fn linear(&self, prefix: &str) -> Result<Linear> {
        let weight = if self.contains(&format!("{prefix}.scales")) {
            self.dequantize(prefix)?
        } else {
            self.get(&format!("{prefix}.weight"))?
                .to_dtype(DType::F32)?
        };

        let bias = self.optional_f32(&format!("{prefix}.bias"))?;
        Ok(Linear::new(weight, bias))
    }

    /// Build a LayerNorm from `{prefix}.weight` / `{prefix}.bias`
    pub fn layer_norm(&self, prefix: &str, eps: f64) -> Result<LayerNorm> {
        let weight = self.get(&format!("{prefix}.weight"))?.to_dtype(DType::F32)?;
        let bias = match self.optional_f32(&format!("{prefix}.bias"))? {
            Some(b) => b,
            None => Tensor::zeros(weight.dims(), DType::F32, &self.device)?,
        };
        Ok(LayerNorm::new(weight, bias, eps))
    }

    /// Build an Embedding from `{prefix}.weight`
    pub fn embedding(&self, prefix: &str) -> Result<Embedding> {
        let weight = self.get(&format!("{prefix}.weight"))?.to_dtype(DType::F32)?;
        let (_, dim) = weight.dims2()?;
        Ok(Embedding::new(weight, dim))
    }

    /// Build a Conv1d from `{prefix}.weight` / `{prefix}.bias`
    ///
    /// MLX layout (out, kernel, in) is transposed to candle's (out, in, kernel).
    pub fn conv1d(&self, prefix: &str, config: Conv1dConfig) -> Result<Conv1d> {
        let weight = self
            .get(&format!("{prefix}.weight"))?
            .to_dtype(DType::F32)?
            .transpose(1, 2)?
            .contiguous()?;
        let bias = self.optional_f32(&format!("{prefix}.bias"))?;
        Ok(Conv1d::new(weight, bias, config))
    }

    fn optional_f32(&self, name: &str) -> Result<Option<Tensor>> {
        match self.tensors.get(name) {
            Some(t) => Ok(Some(t.to_dtype(DType::F32)?)),
            None => Ok(None),
        }
    }

    /// Dequantize a grouped-quantized Linear weight to f32
    fn dequantize(&self, prefix: &str) -> Result<Tensor> {
        let bits = self
            .quant_bits
            .ok_or_else(|| anyhow::anyhow!(
                "Found quantized tensor '{}.scales' but no bit width was given",
                prefix
            ))?;

        let packed = self.get(&format!("{prefix}.weight"))?;
        let scales = self.get(&format!("{prefix}.scales"))?.to_dtype(DType::F32)?;
        let biases = self.get(&format!("{prefix}.biases"))?.to_dtype(DType::F32)?;

        dequantize_rows(&packed, &scales, &biases, bits, &self.device)
    }
}

/// Unpack a (out, in·bits/32) u32 weight into (out, in) f32
///
/// Values are packed little-endian inside each u32; every group of
/// `in / groups` values shares one scale and one bias:
/// `w = scale * q + bias`.
pub fn dequantize_rows(
    packed: &Tensor,
    scales: &Tensor,
    biases: &Tensor,
    bits: usize,
    device: &Device,
) -> Result<Tensor> {
    if bits != 4 && bits != 8 {
        anyhow::bail!("Unsupported quantization bit width: {}", bits);
    }

    let (out_dim, packed_cols) = packed.dims2()?;
    let per_u32 = 32 / bits;
    let in_dim = packed_cols * per_u32;

    let (scales_rows, num_groups) = scales.dims2()?;
    if scales_rows != out_dim {
        anyhow::bail!(
            "Quantization scales rows {} do not match weight rows {}",
            scales_rows,
            out_dim
        );
    }
    let group_size = in_dim / num_groups;
    let mask = (1u32 << bits) - 1;

    let packed_vals: Vec<u32> = packed.flatten_all()?.to_vec1()?;
    let scale_vals: Vec<f32> = scales.flatten_all()?.to_vec1()?;
    let bias_vals: Vec<f32> = biases.flatten_all()?.to_vec1()?;

    let mut weight = vec![0f32; out_dim * in_dim];
    for row in 0..out_dim {
        for col in 0..in_dim {
            let word = packed_vals[row * packed_cols + col / per_u32];
            let q = (word >> ((col % per_u32) * bits)) & mask;

            let group = row * num_groups + col / group_size;
            weight[row * in_dim + col] = scale_vals[group] * q as f32 + bias_vals[group];
        }
    }

    Tensor::from_vec(weight, (out_dim, in_dim), device).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequantize_8bit() {
        let device = Device::Cpu;

        // One row, 4 values packed into a single u32: q = [1, 2, 3, 4]
        let word = 1u32 | (2 << 8) | (3 << 16) | (4 << 24);
        let packed = Tensor::from_vec(vec![word], (1, 1), &device).unwrap();
        // One group of 4, scale 0.5, bias 1.0
        let scales = Tensor::from_vec(vec![0.5f32], (1, 1), &device).unwrap();
        let biases = Tensor::from_vec(vec![1.0f32], (1, 1), &device).unwrap();

        let w = dequantize_rows(&packed, &scales, &biases, 8, &device).unwrap();
        let vals: Vec<f32> = w.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(vals, vec![1.5, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn test_dequantize_4bit_grouping() {
        let device = Device::Cpu;

        // One row, 8 values in one u32: q = [0..8)
        let mut word = 0u32;
        for i in 0..8u32 {
            word |= i << (4 * i);
        }
        let packed = Tensor::from_vec(vec![word], (1, 1), &device).unwrap();
        // Two groups of 4 with different affine params
        let scales = Tensor::from_vec(vec![1.0f32, 2.0], (1, 2), &device).unwrap();
        let biases = Tensor::from_vec(vec![0.0f32, 10.0], (1, 2), &device).unwrap();

        let w = dequantize_rows(&packed, &scales, &biases, 4, &device).unwrap();
        let vals: Vec<f32> = w.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(&vals[..4], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(&vals[4..], &[18.0, 20.0, 22.0, 24.0]);
    }

    #[test]
    fn test_dequantize_rejects_odd_bits() {
        let device = Device::Cpu;
        let t = Tensor::from_vec(vec![0u32], (1, 1), &device).unwrap();
        let s = Tensor::from_vec(vec![1f32], (1, 1), &device).unwrap();
        assert!(dequantize_rows(&t, &s, &s, 6, &device).is_err());
    }

    #[test]
    fn test_linear_from_plain_weights() {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            "proj.weight".to_string(),
            Tensor::ones((2, 3), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "proj.bias".to_string(),
            Tensor::zeros((2,), DType::F32, &device).unwrap(),
        );

        let weights = WeightMap::from_tensors(tensors, &device);
        let linear = weights.linear("proj").unwrap();

        let x = Tensor::ones((1, 3), DType::F32, &device).unwrap();
        let y = candle_nn::Module::forward(&linear, &x).unwrap();
        let vals: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(vals, vec![3.0, 3.0]);
    }

    #[test]
    fn test_missing_tensor_error_names_key() {
        let device = Device::Cpu;
        let weights = WeightMap::from_tensors(HashMap::new(), &device);
        let err = weights.get("transformer.proj.weight").unwrap_err();
        assert!(err.to_string().contains("transformer.proj.weight"));
    }
}
