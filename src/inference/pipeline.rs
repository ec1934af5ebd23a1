//! End-to-end synthesis pipeline

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::audio::{AudioLoader, AudioOutput, MelSpectrogram};
use crate::models::{F5Tts, SampleOptions, SolverMethod};
use crate::text::{chunk_text, TextNormalizer};

/// Reference recordings longer than this are unusual for voice cloning and
/// eat into the frame budget
const MAX_REF_SECONDS: f32 = 10.0;

/// Synthesis parameters
#[derive(Clone)]
pub struct SynthesisConfig {
    /// Number of ODE timesteps
    pub steps: usize,
    /// Solver method
    pub method: SolverMethod,
    /// Classifier-free guidance strength
    pub cfg_strength: f32,
    /// Sway sampling coefficient
    pub sway_sampling_coef: Option<f32>,
    /// Speech rate (higher is faster)
    pub speed: f32,
    /// RNG seed for reproducible output
    pub seed: Option<u64>,
    /// Duration of the generated audio in seconds, excluding the reference.
    /// None uses the duration predictor, or a transcript-length estimate when
    /// no predictor is loaded.
    pub duration_secs: Option<f32>,
    /// Hard cap on total mel frames per chunk (reference included)
    pub max_duration: usize,
    /// Inputs longer than this are split at sentence boundaries and
    /// synthesized chunk by chunk
    pub max_chunk_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            steps: 32,
            method: SolverMethod::Euler,
            cfg_strength: 2.0,
            sway_sampling_coef: Some(-1.0),
            speed: 1.0,
            seed: None,
            duration_secs: None,
            max_duration: crate::MAX_DURATION_FRAMES,
            max_chunk_chars: 300,
        }
    }
}

/// Synthesized audio
#[derive(Debug)]
pub struct SynthesisResult {
    /// Mono waveform samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Generated mel frames (1, frames, n_mels), reference span excluded
    pub mel: Tensor,
}

impl SynthesisResult {
    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Save as a 16-bit PCM WAV file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        AudioOutput::save(&self.samples, self.sample_rate, path)
    }
}

/// Text-to-speech synthesizer
pub struct Synthesizer {
    model: F5Tts,
    mel: MelSpectrogram,
    normalizer: TextNormalizer,
    device: Device,
}

impl Synthesizer {
    /// Build from an already loaded model
    pub fn new(model: F5Tts, device: &Device) -> Self {
        let mel = MelSpectrogram::new(&model.config().mel);
        Self {
            model,
            mel,
            normalizer: TextNormalizer::new(),
            device: device.clone(),
        }
    }

    /// Download (or open locally) a checkpoint and build the pipeline
    pub fn from_pretrained(
        name_or_path: &str,
        quantization_bits: Option<usize>,
        device: &Device,
    ) -> Result<Self> {
        let model = F5Tts::from_pretrained(name_or_path, quantization_bits, device)?;
        Ok(Self::new(model, device))
    }

    /// Access the underlying model
    pub fn model(&self) -> &F5Tts {
        &self.model
    }

    /// Synthesize `text` in the voice of `ref_audio` with default settings
    ///
    /// `ref_text` is the transcript of the reference recording.
    pub fn synthesize<P: AsRef<Path>>(
        &self,
        text: &str,
        ref_audio: P,
        ref_text: &str,
    ) -> Result<SynthesisResult> {
        self.synthesize_with(text, ref_audio, ref_text, &SynthesisConfig::default())
    }

    /// Synthesize with explicit settings
    pub fn synthesize_with<P: AsRef<Path>>(
        &self,
        text: &str,
        ref_audio: P,
        ref_text: &str,
        config: &SynthesisConfig,
    ) -> Result<SynthesisResult> {
        let (ref_samples, sr) = AudioLoader::load(ref_audio.as_ref(), crate::SAMPLE_RATE)
            .with_context(|| format!("Failed to load reference audio {:?}", ref_audio.as_ref()))?;

        let ref_secs = ref_samples.len() as f32 / sr as f32;
        if ref_secs > MAX_REF_SECONDS {
            warn!(
                "Reference audio is {:.1}s; under {:.0}s works best",
                ref_secs, MAX_REF_SECONDS
            );
        }

        self.synthesize_samples(text, &ref_samples, ref_text, config)
    }

    /// Synthesize against reference samples already in memory (24 kHz mono)
    pub fn synthesize_samples(
        &self,
        text: &str,
        ref_samples: &[f32],
        ref_text: &str,
        config: &SynthesisConfig,
    ) -> Result<SynthesisResult> {
        anyhow::ensure!(!text.trim().is_empty(), "Text is empty");
        anyhow::ensure!(!ref_samples.is_empty(), "Reference audio is empty");
        anyhow::ensure!(
            self.model.has_vocoder(),
            "No vocoder loaded; cannot produce a waveform"
        );

        let ref_text = self.normalizer.normalize(ref_text);
        let text = self.normalizer.normalize(text);

        let cond = self.mel.compute_tensor(ref_samples, &self.device)?;
        let ref_frames = cond.dim(1)?;

        let chunks = chunk_text(&text, config.max_chunk_chars);
        if chunks.len() > 1 {
            info!("Splitting input into {} chunks", chunks.len());
        }

        let opts = SampleOptions {
            steps: config.steps,
            method: config.method,
            cfg_strength: config.cfg_strength,
            speed: config.speed,
            sway_sampling_coef: config.sway_sampling_coef,
            seed: config.seed,
            max_duration: config.max_duration,
            ..Default::default()
        };

        let mut samples = Vec::new();
        let mut mel_chunks = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            debug!("Synthesizing chunk {}/{}", i + 1, chunks.len());

            // The model sees the reference transcript followed by the text to
            // generate, matching how its conditioning was trained
            let full_text = format!("{} {}", ref_text, chunk);

            let duration = self.resolve_duration(ref_frames, &ref_text, chunk, config)?;

            let out = self.model.sample(&cond, &[&full_text], duration, &opts)?;
            let audio = out
                .audio
                .ok_or_else(|| anyhow::anyhow!("Vocoder produced no output"))?;

            // Drop the reference span from the decoded waveform and mel
            let total = audio.dim(1)?;
            let ref_len = (ref_frames * crate::HOP_LENGTH).min(total);
            let generated: Vec<f32> = audio
                .narrow(1, ref_len, total - ref_len)?
                .flatten_all()?
                .to_vec1()?;
            samples.extend(generated);

            let total_frames = out.mel.dim(1)?;
            let kept = ref_frames.min(total_frames);
            mel_chunks.push(out.mel.narrow(1, kept, total_frames - kept)?);
        }

        let mel = Tensor::cat(&mel_chunks, 1)?;

        Ok(SynthesisResult {
            samples,
            sample_rate: crate::SAMPLE_RATE,
            mel,
        })
    }

    /// Total frame count for one chunk, or None to let the model predict it
    fn resolve_duration(
        &self,
        ref_frames: usize,
        ref_text: &str,
        chunk: &str,
        config: &SynthesisConfig,
    ) -> Result<Option<usize>> {
        let frame_rate = self.model.frame_rate();

        if let Some(secs) = config.duration_secs {
            anyhow::ensure!(secs > 0.0, "Duration must be positive");
            let frames = ref_frames + (secs * frame_rate) as usize;
            return Ok(Some(frames));
        }

        if self.model.has_duration_predictor() {
            return Ok(None);
        }

        // No predictor: scale the reference length by transcript length
        let ref_chars = ref_text.chars().count().max(1);
        let gen_chars = chunk.chars().count();
        let gen_frames =
            (ref_frames as f32 / ref_chars as f32 * gen_chars as f32 / config.speed) as usize;
        let frames = ref_frames + gen_frames.max((frame_rate * 0.3) as usize);
        debug!("Estimated duration: {} frames", frames);
        Ok(Some(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DitConfig, ModelConfig};
    use crate::models::vocos::{Vocos, VocosConfig};

    fn tiny_synthesizer() -> Synthesizer {
        let device = Device::Cpu;
        let config = ModelConfig {
            dit: DitConfig {
                dim: 64,
                depth: 1,
                heads: 4,
                ff_mult: 2,
                text_dim: 32,
                conv_layers: 1,
                mel_dim: 100,
                text_num_embeds: 256,
            },
            ..Default::default()
        };
        let vocoder = Vocos::init_random(
            VocosConfig {
                dim: 32,
                intermediate_dim: 64,
                num_layers: 1,
                ..Default::default()
            },
            &device,
        )
        .unwrap();
        let model = F5Tts::init_random(config, &device)
            .unwrap()
            .with_vocoder(vocoder);
        Synthesizer::new(model, &device)
    }

    fn fast_config() -> SynthesisConfig {
        SynthesisConfig {
            steps: 2,
            cfg_strength: 0.0,
            duration_secs: Some(0.1),
            ..Default::default()
        }
    }

    #[test]
    fn test_synthesize_samples_produces_audio() {
        let synth = tiny_synthesizer();
        let ref_samples = vec![0.01f32; 2048];

        let result = synth
            .synthesize_samples("hello there", &ref_samples, "hi", &fast_config())
            .unwrap();

        assert_eq!(result.sample_rate, crate::SAMPLE_RATE);
        assert!(!result.samples.is_empty());
        // Roughly the requested 0.1s of generated audio
        assert!(result.duration() > 0.05 && result.duration() < 0.3);
        // Mel covers the generated region, frame-for-frame with the waveform
        let (b, frames, d) = result.mel.dims3().unwrap();
        assert_eq!((b, d), (1, 100));
        assert_eq!(frames * crate::HOP_LENGTH, result.samples.len());
    }

    #[test]
    fn test_synthesize_rejects_empty_text() {
        let synth = tiny_synthesizer();
        let err = synth
            .synthesize_samples("   ", &[0.0f32; 1024], "hi", &fast_config())
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_synthesize_rejects_empty_reference() {
        let synth = tiny_synthesizer();
        let err = synth
            .synthesize_samples("hello", &[], "hi", &fast_config())
            .unwrap_err();
        assert!(err.to_string().contains("Reference"));
    }

    #[test]
    fn test_synthesize_requires_vocoder() {
        let device = Device::Cpu;
        let model = F5Tts::init_random(ModelConfig::default(), &device).unwrap();
        let synth = Synthesizer::new(model, &device);

        let err = synth
            .synthesize_samples("hello", &[0.0f32; 1024], "hi", &fast_config())
            .unwrap_err();
        assert!(err.to_string().contains("vocoder"));
    }

    #[test]
    fn test_estimated_duration_without_predictor() {
        let synth = tiny_synthesizer();
        let config = SynthesisConfig::default();

        // 16 ref frames, 4-char transcript, 8-char text: ~32 generated frames
        let frames = synth
            .resolve_duration(16, "abcd", "abcdefgh", &config)
            .unwrap()
            .unwrap();
        assert_eq!(frames, 16 + 32);
    }

    #[test]
    fn test_explicit_duration_overrides_estimate() {
        let synth = tiny_synthesizer();
        let config = SynthesisConfig {
            duration_secs: Some(2.0),
            ..Default::default()
        };

        let frames = synth
            .resolve_duration(10, "ab", "cd", &config)
            .unwrap()
            .unwrap();
        let expected = 10 + (2.0 * synth.model.frame_rate()) as usize;
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_result_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts.wav");

        let result = SynthesisResult {
            samples: vec![0.0f32; 2400],
            sample_rate: 24_000,
            mel: Tensor::zeros((1, 9, 100), candle_core::DType::F32, &Device::Cpu).unwrap(),
        };
        result.save(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.len(), 2400);
    }
}
