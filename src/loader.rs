//! Weight acquisition and loading for Mochi checkpoints
//!
//! Mochi ships as opaque safetensors blobs (diffusion transformer and VAE
//! decoder) on the Hugging Face hub. This module fetches the files on first
//! use, maps precision strings to candle dtypes, and mmaps checkpoints into
//! a `VarBuilder` for the external model implementations to consume.

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Hub repository carrying the Mochi preview checkpoints.
pub const MOCHI_REPO_ID: &str = "Kijai/Mochi_preview_comfy";

/// Default diffusion transformer checkpoint filename.
pub const DEFAULT_DIT_WEIGHTS: &str = "mochi_preview_dit_bf16.safetensors";

/// Default VAE decoder checkpoint filename.
pub const DEFAULT_VAE_WEIGHTS: &str = "mochi_preview_vae_bf16.safetensors";

/// Errors that can occur during weight acquisition and loading
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Failed to download {filename} from {repo_id}")]
    Download {
        repo_id: String,
        filename: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("Failed to copy checkpoint to {path}")]
    FileCopy {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Weight precision of the loaded checkpoints
///
/// The fp8 variants of the original checkpoints require hardware-specific
/// kernels and have no stable candle dtype; callers pick one of the wide
/// floating point formats instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Bf16,
    Fp16,
    Fp32,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::Bf16 => DType::BF16,
            Precision::Fp16 => DType::F16,
            Precision::Fp32 => DType::F32,
        }
    }
}

/// Attention backend requested from the external transformer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionMode {
    Sdpa,
    FlashAttn,
    SageAttn,
}

impl Default for AttentionMode {
    fn default() -> Self {
        Self::Sdpa
    }
}

/// Resolved on-disk locations of the Mochi checkpoints.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub dit: PathBuf,
    pub vae: PathBuf,
}

impl ModelPaths {
    /// Fetch the transformer and VAE checkpoints, downloading whatever is
    /// not already present under `models_dir`.
    pub fn fetch(
        models_dir: impl AsRef<Path>,
        dit_filename: &str,
        vae_filename: &str,
    ) -> Result<Self, LoaderError> {
        let models_dir = models_dir.as_ref();
        let dit = fetch_weights(
            MOCHI_REPO_ID,
            dit_filename,
            &models_dir.join("diffusion_models").join("mochi"),
        )?;
        let vae = fetch_weights(
            MOCHI_REPO_ID,
            vae_filename,
            &models_dir.join("vae").join("mochi"),
        )?;
        Ok(Self { dit, vae })
    }
}

/// Download a checkpoint file into `dest_dir` unless it is already there.
///
/// Returns the local path. Uses the hub's sync API; the download is cached
/// by hf-hub and hard-copied into the destination so the models directory
/// is self-contained.
pub fn fetch_weights(
    repo_id: &str,
    filename: &str,
    dest_dir: &Path,
) -> Result<PathBuf, LoaderError> {
    let dest = dest_dir.join(filename);
    if dest.exists() {
        return Ok(dest);
    }

    info!(%repo_id, %filename, dest = %dest.display(), "downloading checkpoint");

    let map_api_err = |source| LoaderError::Download {
        repo_id: repo_id.to_string(),
        filename: filename.to_string(),
        source,
    };
    let api = Api::new().map_err(map_api_err)?;
    let cached = api
        .repo(Repo::new(repo_id.to_string(), RepoType::Model))
        .get(filename)
        .map_err(map_api_err)?;

    std::fs::create_dir_all(dest_dir).map_err(|source| LoaderError::FileCopy {
        path: dest_dir.display().to_string(),
        source,
    })?;
    std::fs::copy(&cached, &dest).map_err(|source| LoaderError::FileCopy {
        path: dest.display().to_string(),
        source,
    })?;

    Ok(dest)
}

/// Mmap safetensors checkpoints into a `VarBuilder`.
pub fn load_varbuilder<'a>(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'a>, LoaderError> {
    info!(files = paths.len(), ?dtype, "mmapping checkpoints");
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
    Ok(vb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_dtype_dispatch() {
        assert_eq!(Precision::Bf16.dtype(), DType::BF16);
        assert_eq!(Precision::Fp16.dtype(), DType::F16);
        assert_eq!(Precision::Fp32.dtype(), DType::F32);
    }

    #[test]
    fn test_precision_serde_names() {
        let p: Precision = serde_json::from_str("\"bf16\"").unwrap();
        assert_eq!(p, Precision::Bf16);
        let m: AttentionMode = serde_json::from_str("\"flash_attn\"").unwrap();
        assert_eq!(m, AttentionMode::FlashAttn);
    }
}
