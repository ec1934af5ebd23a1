//! Audio resampling using rubato

use anyhow::Result;
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::SAMPLE_RATE;

/// Audio resampler
pub struct Resampler;

impl Resampler {
    /// Resample audio from one sample rate to another
    pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        if from_sr == to_sr {
            return Ok(samples.to_vec());
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler = SincFixedIn::<f32>::new(
            to_sr as f64 / from_sr as f64,
            2.0,
            params,
            samples.len(),
            1,
        )?;

        let input = vec![samples.to_vec()];
        let output = resampler.process(&input, None)?;

        Ok(output.into_iter().next().unwrap_or_default())
    }

    /// Resample to the 24 kHz model rate
    pub fn resample_to_model_rate(samples: &[f32], from_sr: u32) -> Result<Vec<f32>> {
        Self::resample(samples, from_sr, SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1f32, 0.2, 0.3];
        let out = Resampler::resample(&samples, 24_000, 24_000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_resample_upsamples_length() {
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect();
        let out = Resampler::resample_to_model_rate(&samples, 16_000).unwrap();
        // 16k -> 24k should give roughly 1.5x the samples
        let expected = samples.len() * 3 / 2;
        assert!((out.len() as i64 - expected as i64).abs() < 1024);
    }
}
