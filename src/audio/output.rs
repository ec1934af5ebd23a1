//! Audio output

use anyhow::Result;
use std::path::Path;

/// Audio output handler
pub struct AudioOutput;

impl AudioOutput {
    /// Save audio samples to a 16-bit PCM WAV file
    pub fn save<P: AsRef<Path>>(samples: &[f32], sample_rate: u32, path: P) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;

        for &sample in samples {
            let scaled = (sample * 32767.0).clamp(-32767.0, 32767.0) as i16;
            writer.write_sample(scaled)?;
        }

        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        AudioOutput::save(&samples, 24_000, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(reader.len(), 5);
    }

    #[test]
    fn test_save_clamps_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");

        AudioOutput::save(&[2.0f32, -2.0], 24_000, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![32767, -32767]);
    }
}
