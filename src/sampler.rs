//! Sampler argument assembly for the Mochi diffusion transformer
//!
//! The transformer and its denoising loop live outside this crate; anything
//! implementing [`VideoModel`] can be driven. This module only assembles the
//! structured argument bundle the model expects (sigma schedule, per-step
//! CFG schedule, conditioning, seed) and validates the request.

use candle_core::{Result, Tensor, bail};

use crate::config::SampleConfig;
use crate::scheduler::{DEFAULT_THRESHOLD_NOISE, linear_quadratic_schedule};
use crate::text_encoder::PromptConditioning;

/// Argument bundle handed to the external sampler.
#[derive(Debug, Clone)]
pub struct SamplerArgs {
    pub height: usize,
    pub width: usize,
    pub num_frames: usize,
    /// Noise levels per step, `num_inference_steps + 1` entries from 1.0
    /// down to 0.0.
    pub sigma_schedule: Vec<f64>,
    /// Guidance scale per step.
    pub cfg_schedule: Vec<f64>,
    pub num_inference_steps: usize,
    /// Run positive and negative conditioning in one batched forward pass.
    pub batch_cfg: bool,
    pub positive: PromptConditioning,
    pub negative: PromptConditioning,
    pub seed: u64,
}

/// Opaque diffusion transformer with its sampling loop.
pub trait VideoModel {
    /// Run the denoising loop and return the `[B, C, T, H, W]` latents.
    fn run(&mut self, args: &SamplerArgs) -> Result<Tensor>;
}

/// Assemble the sampler arguments for `config` and run the model.
///
/// Returns the latent tensor produced by the sampling loop. The output is
/// validated to be 5-dimensional; its extents are a property of the model's
/// downscale factors and are left to the decoder to interpret.
pub fn sample(
    model: &mut dyn VideoModel,
    positive: PromptConditioning,
    negative: PromptConditioning,
    config: &SampleConfig,
) -> Result<Tensor> {
    if config.num_inference_steps < 2 {
        bail!(
            "num_inference_steps must be at least 2, got {}",
            config.num_inference_steps
        );
    }

    let sigma_schedule =
        linear_quadratic_schedule(config.num_inference_steps, DEFAULT_THRESHOLD_NOISE, None)?;
    let cfg_schedule = vec![config.guidance_scale; config.num_inference_steps];

    let args = SamplerArgs {
        height: config.height,
        width: config.width,
        num_frames: config.num_frames,
        sigma_schedule,
        cfg_schedule,
        num_inference_steps: config.num_inference_steps,
        batch_cfg: config.batch_cfg,
        positive,
        negative,
        seed: config.seed,
    };

    let latents = model.run(&args)?;
    latents.dims5()?;
    Ok(latents)
}
