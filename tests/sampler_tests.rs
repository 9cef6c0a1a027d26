//! Tests for sampler argument assembly
//!
//! The diffusion transformer is mocked behind the `VideoModel` seam; these
//! tests pin down the argument bundle the sampler receives and the request
//! validation around it.

use std::cell::RefCell;

use candle_core::{DType, Device, Result, Tensor};
use candle_mochi::config::SampleConfig;
use candle_mochi::sampler::{SamplerArgs, VideoModel, sample};
use candle_mochi::text_encoder::PromptConditioning;

// =============================================================================
// Helpers
// =============================================================================

fn mock_conditioning(device: &Device) -> Result<PromptConditioning> {
    Ok(PromptConditioning {
        embeds: Tensor::zeros((1, 256, 8), DType::F32, device)?,
        attention_mask: Tensor::ones((1, 256), DType::U8, device)?,
    })
}

/// Records the argument bundle and returns a fixed latent tensor.
struct RecordingModel {
    seen: RefCell<Option<SamplerArgs>>,
    latent_shape: (usize, usize, usize, usize, usize),
}

impl RecordingModel {
    fn new(latent_shape: (usize, usize, usize, usize, usize)) -> Self {
        Self {
            seen: RefCell::new(None),
            latent_shape,
        }
    }
}

impl VideoModel for RecordingModel {
    fn run(&mut self, args: &SamplerArgs) -> Result<Tensor> {
        *self.seen.borrow_mut() = Some(args.clone());
        Tensor::zeros(self.latent_shape, DType::F32, &Device::Cpu)
    }
}

/// Model that hands back a malformed (non-5D) latent tensor.
struct MalformedModel;

impl VideoModel for MalformedModel {
    fn run(&mut self, _args: &SamplerArgs) -> Result<Tensor> {
        Tensor::zeros((1, 12, 60, 106), DType::F32, &Device::Cpu)
    }
}

// =============================================================================
// Argument Assembly Tests
// =============================================================================

#[test]
fn test_sampler_args_assembly() -> Result<()> {
    let device = Device::Cpu;
    let config = SampleConfig::new(848, 480, 49)
        .unwrap()
        .with_steps(30)
        .with_guidance_scale(4.5)
        .with_seed(42);

    let mut model = RecordingModel::new((1, 12, 13, 60, 106));
    let latents = sample(
        &mut model,
        mock_conditioning(&device)?,
        mock_conditioning(&device)?,
        &config,
    )?;
    assert_eq!(latents.dims(), &[1, 12, 13, 60, 106]);

    let args = model.seen.borrow().clone().expect("model was invoked");
    assert_eq!(args.height, 480);
    assert_eq!(args.width, 848);
    assert_eq!(args.num_frames, 49);
    assert_eq!(args.num_inference_steps, 30);
    assert_eq!(args.seed, 42);
    assert!(!args.batch_cfg);

    // One sigma per step plus the terminal value, noise to clean.
    assert_eq!(args.sigma_schedule.len(), 31);
    assert!((args.sigma_schedule[0] - 1.0).abs() < 1e-12);
    assert!(args.sigma_schedule[30].abs() < 1e-12);

    // Constant guidance across all steps.
    assert_eq!(args.cfg_schedule.len(), 30);
    assert!(args.cfg_schedule.iter().all(|&g| (g - 4.5).abs() < 1e-12));
    Ok(())
}

#[test]
fn test_batch_cfg_passthrough() -> Result<()> {
    let device = Device::Cpu;
    let config = SampleConfig::new(848, 480, 49).unwrap().with_batch_cfg(true);

    let mut model = RecordingModel::new((1, 12, 13, 60, 106));
    sample(
        &mut model,
        mock_conditioning(&device)?,
        mock_conditioning(&device)?,
        &config,
    )?;
    assert!(model.seen.borrow().as_ref().unwrap().batch_cfg);
    Ok(())
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_sample_config_rejects_bad_dimensions() {
    assert!(SampleConfig::new(850, 480, 49).is_err());
    assert!(SampleConfig::new(848, 481, 49).is_err());
    assert!(SampleConfig::new(848, 480, 49).is_ok());
}

#[test]
fn test_sample_config_rejects_bad_frame_counts() {
    // Frames must be 6N+1 and at least 7.
    assert!(SampleConfig::new(848, 480, 48).is_err());
    assert!(SampleConfig::new(848, 480, 6).is_err());
    assert!(SampleConfig::new(848, 480, 1).is_err());
    assert!(SampleConfig::new(848, 480, 7).is_ok());
    assert!(SampleConfig::new(848, 480, 13).is_ok());
}

#[test]
fn test_sample_rejects_single_step() -> Result<()> {
    let device = Device::Cpu;
    let config = SampleConfig::new(848, 480, 49).unwrap().with_steps(1);
    let mut model = RecordingModel::new((1, 12, 13, 60, 106));

    let result = sample(
        &mut model,
        mock_conditioning(&device)?,
        mock_conditioning(&device)?,
        &config,
    );
    assert!(result.is_err());
    assert!(model.seen.borrow().is_none(), "model must not run");
    Ok(())
}

#[test]
fn test_sample_rejects_malformed_latents() -> Result<()> {
    let device = Device::Cpu;
    let config = SampleConfig::new(848, 480, 49).unwrap();
    let mut model = MalformedModel;

    let result = sample(
        &mut model,
        mock_conditioning(&device)?,
        mock_conditioning(&device)?,
        &config,
    );
    assert!(result.is_err(), "4-D sampler output must be rejected");
    Ok(())
}
