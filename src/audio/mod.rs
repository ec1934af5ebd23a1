//! Audio processing modules
//!
//! - WAV loading with mono downmix and resampling to the 24 kHz model rate
//! - Log-mel spectrogram computation (100 bands, 1024-point FFT, hop 256)
//! - Waveform output (16-bit PCM WAV)

mod loader;
mod mel;
mod output;
mod resampler;

pub use loader::AudioLoader;
pub use mel::MelSpectrogram;
pub use output::AudioOutput;
pub use resampler::Resampler;
