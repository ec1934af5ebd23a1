//! Utility functions and helpers
//!
//! Tensor-shaping helpers shared by the flow-matching model and the
//! duration predictor.

/// Tensor utilities
pub mod tensor_utils {
    use candle_core::{DType, Device, Result, Tensor};

    /// Build a boolean padding mask from per-row lengths
    ///
    /// Returns a (batch, length) u8 tensor where 1 marks a valid position.
    pub fn lens_to_mask(lens: &[usize], length: usize, device: &Device) -> Result<Tensor> {
        let batch = lens.len();
        let mut data = vec![0u8; batch * length];

        for (b, &len) in lens.iter().enumerate() {
            for i in 0..len.min(length) {
                data[b * length + i] = 1;
            }
        }

        Tensor::from_vec(data, (batch, length), device)
    }

    /// Mask a random fractional span inside each row (training infill mask)
    ///
    /// For row b with length `lens[b]`, marks a contiguous span covering
    /// `fracs[b]` of the row starting at a random offset.
    pub fn mask_from_frac_lengths(
        lens: &[usize],
        fracs: &[f32],
        max_length: usize,
        device: &Device,
    ) -> Result<Tensor> {
        let batch = lens.len();
        let mut data = vec![0u8; batch * max_length];

        for (b, (&len, &frac)) in lens.iter().zip(fracs.iter()).enumerate() {
            let span = (len as f32 * frac) as usize;
            let max_start = len.saturating_sub(span);
            let start = if max_start > 0 {
                rand::random::<usize>() % (max_start + 1)
            } else {
                0
            };
            for i in start..(start + span).min(max_length) {
                data[b * max_length + i] = 1;
            }
        }

        Tensor::from_vec(data, (batch, max_length), device)
    }

    /// Stack variable-length (len, dim) tensors into (batch, max_len, dim),
    /// padding with `padding_value`
    pub fn pad_sequence(tensors: &[Tensor], padding_value: f32) -> Result<Tensor> {
        let max_len = tensors
            .iter()
            .map(|t| t.dim(0).unwrap_or(0))
            .max()
            .unwrap_or(0);

        let mut padded = Vec::with_capacity(tensors.len());
        for t in tensors {
            let (len, dim) = t.dims2()?;
            if len == max_len {
                padded.push(t.clone());
            } else {
                let pad = Tensor::full(padding_value, (max_len - len, dim), t.device())?
                    .to_dtype(t.dtype())?;
                padded.push(Tensor::cat(&[t, &pad], 0)?);
            }
        }

        Tensor::stack(&padded, 0)
    }

    /// Broadcast a (batch, length) u8 mask against a (batch, length, dim)
    /// tensor, zeroing masked-out positions
    pub fn apply_mask(x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let mask = mask
            .to_dtype(DType::F32)?
            .unsqueeze(2)?
            .broadcast_as(x.shape())?;
        x.mul(&mask)
    }

    /// Select between two tensors per position from a (batch, length) u8 mask
    pub fn where_mask(mask: &Tensor, on_true: &Tensor, on_false: &Tensor) -> Result<Tensor> {
        let mask = mask.unsqueeze(2)?.broadcast_as(on_true.shape())?;
        mask.where_cond(on_true, on_false)
    }
}

#[cfg(test)]
mod tests {
    use super::tensor_utils::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn test_lens_to_mask() {
        let device = Device::Cpu;
        let mask = lens_to_mask(&[2, 4], 4, &device).unwrap();
        let rows: Vec<Vec<u8>> = mask.to_vec2().unwrap();

        assert_eq!(rows[0], vec![1, 1, 0, 0]);
        assert_eq!(rows[1], vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_mask_from_frac_lengths_span_size() {
        let device = Device::Cpu;
        let mask = mask_from_frac_lengths(&[100], &[0.5], 100, &device).unwrap();
        let row: Vec<u8> = mask.to_vec2::<u8>().unwrap().remove(0);

        let ones: usize = row.iter().map(|&v| v as usize).sum();
        assert_eq!(ones, 50);

        // The span is contiguous
        let first = row.iter().position(|&v| v == 1).unwrap();
        assert!(row[first..first + 50].iter().all(|&v| v == 1));
    }

    #[test]
    fn test_pad_sequence() {
        let device = Device::Cpu;
        let a = Tensor::ones((3, 2), candle_core::DType::F32, &device).unwrap();
        let b = Tensor::ones((5, 2), candle_core::DType::F32, &device).unwrap();

        let stacked = pad_sequence(&[a, b], 0.0).unwrap();
        assert_eq!(stacked.dims(), &[2, 5, 2]);

        // Row 0 is zero-padded past its length
        let v: Vec<Vec<Vec<f32>>> = stacked.to_vec3().unwrap();
        assert_eq!(v[0][4], vec![0.0, 0.0]);
        assert_eq!(v[1][4], vec![1.0, 1.0]);
    }

    #[test]
    fn test_apply_mask_zeroes_padding() {
        let device = Device::Cpu;
        let x = Tensor::ones((1, 3, 2), candle_core::DType::F32, &device).unwrap();
        let mask = lens_to_mask(&[2], 3, &device).unwrap();

        let masked = apply_mask(&x, &mask).unwrap();
        let v: Vec<Vec<Vec<f32>>> = masked.to_vec3().unwrap();
        assert_eq!(v[0][1], vec![1.0, 1.0]);
        assert_eq!(v[0][2], vec![0.0, 0.0]);
    }
}
