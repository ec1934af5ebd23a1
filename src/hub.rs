//! HuggingFace hub access
//!
//! Resolves model repositories to local file paths. A name that points at an
//! existing directory bypasses the hub entirely, so offline checkpoints work
//! with the same code path.

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default F5-TTS model repository
pub const DEFAULT_MODEL_REPO: &str = "lucasnewman/f5-tts-mlx";

/// Vocos vocoder repository matched to the 24 kHz / 100-mel front end
pub const VOCOS_REPO: &str = "lucasnewman/vocos-mel-24khz";

/// Resolved files of an F5-TTS checkpoint
#[derive(Debug)]
pub struct ModelFiles {
    /// Main DiT weights
    pub model: PathBuf,
    /// Character vocabulary
    pub vocab: PathBuf,
    /// Optional duration predictor weights
    pub duration: Option<PathBuf>,
    /// Optional hyperparameter overrides
    pub config: Option<PathBuf>,
}

/// Fetch (or locate) an F5-TTS checkpoint
pub fn fetch_model(name_or_path: &str) -> Result<ModelFiles> {
    let local = Path::new(name_or_path);
    if local.is_dir() {
        debug!("Using local checkpoint at {:?}", local);
        return files_from_dir(local);
    }

    info!("Fetching {} from the HuggingFace hub", name_or_path);
    let api = Api::new().context("Failed to initialize hub client")?;
    let repo = api.model(name_or_path.to_string());

    let model = repo
        .get("model.safetensors")
        .with_context(|| format!("Could not find model {}", name_or_path))?;
    let vocab = repo
        .get("vocab.txt")
        .with_context(|| format!("Model {} has no vocab.txt", name_or_path))?;
    // Only newer checkpoints ship a duration predictor
    let duration = repo.get("duration_v2.safetensors").ok();
    let config = repo.get("config.json").ok();

    Ok(ModelFiles {
        model,
        vocab,
        duration,
        config,
    })
}

/// Fetch (or locate) the Vocos vocoder weights
pub fn fetch_vocoder(name_or_path: &str) -> Result<PathBuf> {
    let local = Path::new(name_or_path);
    if local.is_dir() {
        let path = local.join("model.safetensors");
        anyhow::ensure!(path.exists(), "No model.safetensors in {:?}", local);
        return Ok(path);
    }
    if local.is_file() {
        return Ok(local.to_path_buf());
    }

    info!("Fetching vocoder {} from the HuggingFace hub", name_or_path);
    let api = Api::new().context("Failed to initialize hub client")?;
    api.model(name_or_path.to_string())
        .get("model.safetensors")
        .with_context(|| format!("Could not find vocoder {}", name_or_path))
}

fn files_from_dir(dir: &Path) -> Result<ModelFiles> {
    let model = dir.join("model.safetensors");
    anyhow::ensure!(model.exists(), "No model.safetensors in {:?}", dir);
    let vocab = dir.join("vocab.txt");
    anyhow::ensure!(vocab.exists(), "No vocab.txt in {:?}", dir);

    let duration = Some(dir.join("duration_v2.safetensors")).filter(|p| p.exists());
    let config = Some(dir.join("config.json")).filter(|p| p.exists());

    Ok(ModelFiles {
        model,
        vocab,
        duration,
        config,
    })
}

/// Infer quantization bit width from a model name ("-4bit" / "-8bit" suffixes)
pub fn quantization_from_name(name: &str) -> Option<usize> {
    if name.contains("8bit") {
        Some(8)
    } else if name.contains("4bit") {
        Some(4)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_from_name() {
        assert_eq!(quantization_from_name("lucasnewman/f5-tts-mlx-4bit"), Some(4));
        assert_eq!(quantization_from_name("lucasnewman/f5-tts-mlx-8bit"), Some(8));
        assert_eq!(quantization_from_name("lucasnewman/f5-tts-mlx"), None);
    }

    #[test]
    fn test_local_dir_requires_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_model(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("model.safetensors"));
    }

    #[test]
    fn test_local_dir_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        std::fs::write(dir.path().join("vocab.txt"), b"a\nb").unwrap();

        let files = fetch_model(dir.path().to_str().unwrap()).unwrap();
        assert!(files.model.ends_with("model.safetensors"));
        assert!(files.duration.is_none());
        assert!(files.config.is_none());
    }
}
