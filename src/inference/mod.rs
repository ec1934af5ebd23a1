//! Inference pipeline
//!
//! High-level synthesis: reference audio in, cloned speech out. Handles text
//! normalization, chunking of long inputs, duration resolution and trimming
//! of the reference span from the decoded waveform.

mod pipeline;

pub use pipeline::{SynthesisConfig, SynthesisResult, Synthesizer};
