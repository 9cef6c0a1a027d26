//! Candle-Mochi: Mochi 1 text-to-video integration for the Candle framework.
//!
//! This crate provides the glue needed to drive the Mochi preview model from
//! a host pipeline: sigma schedule construction, T5-XXL text conditioning,
//! sampler argument assembly, and tiled, overlap-blended VAE decoding of the
//! spatiotemporal latents. The diffusion transformer and the convolutional
//! VAE decoder network are supplied by the caller behind narrow trait seams.

pub mod config;
pub mod loader;
pub mod sampler;
pub mod scheduler;
pub mod text_encoder;
pub mod vae;

pub use config::{DecodeConfig, SampleConfig};
pub use sampler::{SamplerArgs, VideoModel, sample};
pub use scheduler::linear_quadratic_schedule;
pub use text_encoder::PromptConditioning;
pub use vae::{TileGeometry, VaeDecoder, decode_latents};
