//! Audio file loading

use anyhow::{Context, Result};
use std::path::Path;

/// Audio loader for reference recordings
pub struct AudioLoader;

impl AudioLoader {
    /// Load audio from a file and return mono samples at the requested rate
    pub fn load<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<(Vec<f32>, u32)> {
        let path = path.as_ref();

        if path.extension().map_or(false, |e| e == "wav") {
            return Self::load_wav(path, target_sr);
        }

        Err(anyhow::anyhow!("Unsupported audio format: {:?}", path))
    }

    fn load_wav<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<(Vec<f32>, u32)> {
        let reader = hound::WavReader::open(path.as_ref())
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        let sample_rate = spec.sample_rate;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.into_samples::<f32>()
                    .filter_map(Result::ok)
                    .collect()
            }
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader.into_samples::<i32>()
                    .filter_map(Result::ok)
                    .map(|s| s as f32 / max_value)
                    .collect()
            }
        };

        // Convert to mono if multi-channel
        let mono_samples = if spec.channels > 1 {
            samples
                .chunks(spec.channels as usize)
                .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
                .collect()
        } else {
            samples
        };

        if sample_rate != target_sr {
            let resampled = super::Resampler::resample(&mono_samples, sample_rate, target_sr)?;
            Ok((resampled, target_sr))
        } else {
            Ok((mono_samples, sample_rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioOutput;

    #[test]
    fn test_load_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let samples: Vec<f32> = (0..24_000)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 24_000.0).sin() * 0.5)
            .collect();
        AudioOutput::save(&samples, 24_000, &path).unwrap();

        let (loaded, sr) = AudioLoader::load(&path, 24_000).unwrap();
        assert_eq!(sr, 24_000);
        assert_eq!(loaded.len(), samples.len());
        // 16-bit quantization error only
        for (a, b) in loaded.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_load_unsupported_format() {
        let result = AudioLoader::load("voice.ogg", 24_000);
        assert!(result.is_err());
    }
}
