//! Neural network models
//!
//! - DiT flow estimator (text + masked-mel conditioned velocity field)
//! - Duration predictor (speech length in seconds from reference + text)
//! - Conditional flow matching sampler (the F5-TTS model proper)
//! - Vocos vocoder (mel to waveform)

pub mod cfm;
pub mod dit;
pub mod duration;
pub mod vocos;

// Re-exports
pub use cfm::{F5Tts, SampleOptions, SampleOutput, SolverMethod};
pub use dit::DiT;
pub use duration::DurationPredictor;
pub use vocos::Vocos;
