//! Character vocabulary
//!
//! The F5-TTS checkpoints ship a `vocab.txt` with one symbol per line; the
//! line number is the token id. Text is tokenized per character against this
//! map, and batches are padded with -1.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

use super::TEXT_PAD_ID;

/// Character-to-id vocabulary map
#[derive(Debug, Clone, Default)]
pub struct VocabCharMap {
    map: HashMap<char, i64>,
}

impl VocabCharMap {
    /// Load from a vocab.txt file (one symbol per line, index order)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read vocab {:?}", path.as_ref()))?;

        let mut map = HashMap::new();
        for (i, line) in content.split('\n').enumerate() {
            let mut chars = line.chars();
            if let Some(c) = chars.next() {
                // Multi-char lines are legacy artifacts; first char wins
                map.entry(c).or_insert(i as i64);
            }
        }

        if map.is_empty() {
            anyhow::bail!("Empty vocabulary at {:?}", path.as_ref());
        }

        Ok(Self { map })
    }

    /// Build from an explicit symbol list (test helper)
    pub fn from_symbols(symbols: &[char]) -> Self {
        let map = symbols
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as i64))
            .collect();
        Self { map }
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no symbols are loaded
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Id for a character; unknown characters map to the filler slot (0)
    pub fn id(&self, c: char) -> i64 {
        self.map.get(&c).copied().unwrap_or(0)
    }

    /// Encode one string to ids
    pub fn encode(&self, text: &str) -> Vec<i64> {
        text.chars().map(|c| self.id(c)).collect()
    }

    /// Encode a batch of strings into a (batch, max_len) tensor padded with -1
    pub fn encode_batch(&self, texts: &[&str], device: &Device) -> Result<Tensor> {
        let ids: Vec<Vec<i64>> = texts.iter().map(|t| self.encode(t)).collect();
        ids_to_tensor(ids, device)
    }
}

/// Byte-level fallback tokenization when no vocabulary is available
pub fn encode_batch_bytes(texts: &[&str], device: &Device) -> Result<Tensor> {
    let ids: Vec<Vec<i64>> = texts
        .iter()
        .map(|t| t.bytes().map(|b| b as i64).collect())
        .collect();
    ids_to_tensor(ids, device)
}

fn ids_to_tensor(ids: Vec<Vec<i64>>, device: &Device) -> Result<Tensor> {
    let batch = ids.len();
    let max_len = ids.iter().map(|v| v.len()).max().unwrap_or(0);

    let mut data = vec![TEXT_PAD_ID; batch * max_len];
    for (b, seq) in ids.iter().enumerate() {
        data[b * max_len..b * max_len + seq.len()].copy_from_slice(seq);
    }

    Tensor::from_vec(data, (batch, max_len), device).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_vocab(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", lines.join("\n")).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_vocab() {
        let (_dir, path) = write_vocab(&[" ", "a", "b", "c"]);
        let vocab = VocabCharMap::load(&path).unwrap();

        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id(' '), 0);
        assert_eq!(vocab.id('b'), 2);
    }

    #[test]
    fn test_unknown_maps_to_filler() {
        let (_dir, path) = write_vocab(&[" ", "a"]);
        let vocab = VocabCharMap::load(&path).unwrap();
        assert_eq!(vocab.id('z'), 0);
    }

    #[test]
    fn test_empty_vocab_errors() {
        let (_dir, path) = write_vocab(&[]);
        assert!(VocabCharMap::load(&path).is_err());
    }

    #[test]
    fn test_encode_batch_padding() {
        let vocab = VocabCharMap::from_symbols(&[' ', 'a', 'b']);
        let t = vocab
            .encode_batch(&["ab", "a"], &Device::Cpu)
            .unwrap();

        assert_eq!(t.dims(), &[2, 2]);
        let rows: Vec<Vec<i64>> = t.to_vec2().unwrap();
        assert_eq!(rows[0], vec![1, 2]);
        assert_eq!(rows[1], vec![1, TEXT_PAD_ID]);
    }

    #[test]
    fn test_byte_fallback() {
        let t = encode_batch_bytes(&["ab"], &Device::Cpu).unwrap();
        let rows: Vec<Vec<i64>> = t.to_vec2().unwrap();
        assert_eq!(rows[0], vec![97, 98]);
    }
}
