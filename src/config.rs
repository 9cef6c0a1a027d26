//! Configuration structures for the Mochi pipeline components

use serde::{Deserialize, Serialize};

/// Latent-to-sample spatial upscale factor of the Mochi VAE decoder.
pub const VAE_SPATIAL_SCALE: usize = 8;

/// Tiled decode configuration for `decode_latents`
///
/// Mirrors the decode node surface: either explicit tile sizes and overlap
/// factors, or `auto_tile_size` which derives the geometry from the latent
/// resolution (tiles of half the decoded size per axis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Decode in overlapping tiles instead of a single pass. Drastically
    /// reduces memory use but may introduce seams.
    #[serde(default)]
    pub enable_tiling: bool,
    /// Derive tile geometry from the latent resolution. When set, the
    /// explicit tile/overlap fields below are ignored.
    #[serde(default = "default_true")]
    pub auto_tile_size: bool,
    /// Number of latent frames decoded per VAE invocation.
    #[serde(default = "default_frame_batch_size")]
    pub frame_batch_size: usize,
    /// Minimum tile height in sample space (pixels).
    #[serde(default = "default_tile_sample_min_height")]
    pub tile_sample_min_height: usize,
    /// Minimum tile width in sample space (pixels).
    #[serde(default = "default_tile_sample_min_width")]
    pub tile_sample_min_width: usize,
    /// Fraction of the tile height shared with the tile above.
    #[serde(default = "default_tile_overlap_factor_height")]
    pub tile_overlap_factor_height: f64,
    /// Fraction of the tile width shared with the tile to the left.
    #[serde(default = "default_tile_overlap_factor_width")]
    pub tile_overlap_factor_width: f64,
}

fn default_true() -> bool {
    true
}
fn default_frame_batch_size() -> usize {
    6
}
fn default_tile_sample_min_height() -> usize {
    240
}
fn default_tile_sample_min_width() -> usize {
    424
}
fn default_tile_overlap_factor_height() -> f64 {
    0.1666
}
fn default_tile_overlap_factor_width() -> f64 {
    0.2
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            enable_tiling: false,
            auto_tile_size: true,
            frame_batch_size: 6,
            tile_sample_min_height: 240,
            tile_sample_min_width: 424,
            tile_overlap_factor_height: 0.1666,
            tile_overlap_factor_width: 0.2,
        }
    }
}

/// Sampling configuration for the Mochi diffusion transformer
#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Video width (must be a multiple of 8)
    pub width: usize,
    /// Video height (must be a multiple of 8)
    pub height: usize,
    /// Number of frames to generate (must be 6N+1)
    pub num_frames: usize,
    /// Number of denoising steps (at least 2)
    pub num_inference_steps: usize,
    /// Classifier-free guidance scale
    pub guidance_scale: f64,
    /// Random seed for the initial noise
    pub seed: u64,
    /// Batch positive/negative conditioning into one forward pass
    pub batch_cfg: bool,
}

impl SampleConfig {
    /// Create a new sampling configuration with validation
    pub fn new(width: usize, height: usize, num_frames: usize) -> Result<Self, ConfigError> {
        if !width.is_multiple_of(VAE_SPATIAL_SCALE) || !height.is_multiple_of(VAE_SPATIAL_SCALE) {
            return Err(ConfigError::InvalidDimensions { height, width });
        }
        // Mochi generates 6N+1 frames (temporal compression of 6 plus the
        // initial frame).
        if num_frames < 7 || !(num_frames - 1).is_multiple_of(6) {
            return Err(ConfigError::InvalidFrameCount(num_frames));
        }

        Ok(Self {
            width,
            height,
            num_frames,
            num_inference_steps: 50,
            guidance_scale: 4.5,
            seed: 0,
            batch_cfg: false,
        })
    }

    /// Set the number of denoising steps
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.num_inference_steps = steps;
        self
    }

    /// Set the classifier-free guidance scale
    pub fn with_guidance_scale(mut self, scale: f64) -> Self {
        self.guidance_scale = scale;
        self
    }

    /// Set the noise seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Batch positive/negative conditioning into one forward pass
    pub fn with_batch_cfg(mut self, batch_cfg: bool) -> Self {
        self.batch_cfg = batch_cfg;
        self
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            width: 848,
            height: 480,
            num_frames: 49,
            num_inference_steps: 50,
            guidance_scale: 4.5,
            seed: 0,
            batch_cfg: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid frame count: {0}. Must be 6N+1 (e.g., 7, 13, 49, ...)")]
    InvalidFrameCount(usize),
    #[error("Invalid dimensions: height={height}, width={width}. Must be multiple of 8")]
    InvalidDimensions { height: usize, width: usize },
}
