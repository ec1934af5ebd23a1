//! Text processing modules
//!
//! - Character vocabulary mapping (vocab.txt from the checkpoint)
//! - Light normalization (whitespace, typographic punctuation)
//! - Sentence-aware chunking for long inputs

mod chunker;
mod normalizer;
mod vocab;

pub use chunker::chunk_text;
pub use normalizer::TextNormalizer;
pub use vocab::{encode_batch_bytes, VocabCharMap};

/// Pad value used for text id sequences; shifted to the filler slot in-model
pub const TEXT_PAD_ID: i64 = -1;
