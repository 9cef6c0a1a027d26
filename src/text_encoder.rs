//! T5-XXL text conditioning for the Mochi sampler
//!
//! Mochi conditions on T5-XXL embeddings with a hard 256-token budget. This
//! module wraps the `candle-transformers` T5 encoder behind a small glue
//! layer: tokenize with padding to the budget, reject prompts that exceed
//! it, run the encoder, and scale the embeddings by a conditioning strength.
//!
//! The encoder weights themselves are external; the wrapper is created
//! without them and loaded from a `VarBuilder` when available.

use candle_core::{DType, Device, Tensor};
use candle_transformers::models::t5;
use tokenizers::Tokenizer;

use std::path::Path;

/// Hard cap on prompt tokens supported by the Mochi transformer.
pub const MAX_TOKENS: usize = 256;

/// Errors specific to text conditioning
#[derive(Debug, thiserror::Error)]
pub enum TextEncoderError {
    #[error("Prompt is too long, max tokens supported is {max} or less, got {got}")]
    PromptTooLong { got: usize, max: usize },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Text conditioning handed to the sampler.
#[derive(Debug, Clone)]
pub struct PromptConditioning {
    /// `[1, MAX_TOKENS, d_model]` T5 hidden states, scaled by strength.
    pub embeds: Tensor,
    /// `[1, MAX_TOKENS]` boolean mask, true on real tokens.
    pub attention_mask: Tensor,
}

/// T5 encoder configuration
///
/// Preset for T5-XXL, the text encoder used by Mochi (4096-dim hidden
/// states, 64 heads, 24 encoder layers).
#[derive(Debug, Clone)]
pub struct T5EncoderConfig {
    pub d_model: usize,
    pub d_ff: usize,
    pub d_kv: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub vocab_size: usize,
    pub layer_norm_epsilon: f64,
    pub relative_attention_num_buckets: usize,
    pub relative_attention_max_distance: usize,
}

impl Default for T5EncoderConfig {
    fn default() -> Self {
        Self::t5_xxl()
    }
}

impl T5EncoderConfig {
    /// T5-XXL configuration preset
    pub fn t5_xxl() -> Self {
        Self {
            d_model: 4096,
            d_ff: 10240,
            d_kv: 64,
            num_heads: 64,
            num_layers: 24,
            vocab_size: 32128,
            layer_norm_epsilon: 1e-6,
            relative_attention_num_buckets: 32,
            relative_attention_max_distance: 128,
        }
    }

    /// Convert to a candle-transformers T5 config
    pub fn to_candle_t5_config(&self) -> t5::Config {
        t5::Config {
            vocab_size: self.vocab_size,
            d_model: self.d_model,
            d_kv: self.d_kv,
            d_ff: self.d_ff,
            num_layers: self.num_layers,
            num_decoder_layers: None,
            num_heads: self.num_heads,
            relative_attention_num_buckets: self.relative_attention_num_buckets,
            relative_attention_max_distance: self.relative_attention_max_distance,
            dropout_rate: 0.0,
            layer_norm_epsilon: self.layer_norm_epsilon,
            initializer_factor: 1.0,
            feed_forward_proj: t5::ActivationWithOptionalGating {
                gated: true,
                activation: candle_nn::Activation::NewGelu,
            },
            tie_word_embeddings: false,
            is_decoder: false,
            is_encoder_decoder: false,
            use_cache: true,
            pad_token_id: 0,
            eos_token_id: 1,
            decoder_start_token_id: None,
        }
    }
}

/// Pad token ids to [`MAX_TOKENS`] and build the matching attention mask.
///
/// Fails when the prompt tokenizes to more than the budget; the cap is
/// enforced here rather than by truncation so over-long prompts surface as
/// an error instead of being silently cut.
pub fn pad_and_mask(ids: &[u32]) -> Result<(Vec<u32>, Vec<u8>), TextEncoderError> {
    if ids.len() > MAX_TOKENS {
        return Err(TextEncoderError::PromptTooLong {
            got: ids.len(),
            max: MAX_TOKENS,
        });
    }
    let mut padded = ids.to_vec();
    let mut mask = vec![1u8; ids.len()];
    padded.resize(MAX_TOKENS, 0);
    mask.resize(MAX_TOKENS, 0);
    Ok((padded, mask))
}

/// Wrapper around the T5-XXL encoder for Mochi text conditioning
pub struct MochiTextEncoder {
    config: T5EncoderConfig,
    tokenizer: Tokenizer,
    model: Option<t5::T5EncoderModel>,
    device: Device,
    dtype: DType,
}

impl MochiTextEncoder {
    /// Create the wrapper from a `tokenizer.json` file, without weights.
    pub fn new(
        tokenizer_path: impl AsRef<Path>,
        config: T5EncoderConfig,
        device: Device,
        dtype: DType,
    ) -> Result<Self, TextEncoderError> {
        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| TextEncoderError::Tokenizer(e.to_string()))?;
        Ok(Self {
            config,
            tokenizer,
            model: None,
            device,
            dtype,
        })
    }

    /// Load encoder weights from a VarBuilder
    pub fn load_model(&mut self, vb: candle_nn::VarBuilder) -> Result<(), TextEncoderError> {
        let candle_config = self.config.to_candle_t5_config();
        self.model = Some(t5::T5EncoderModel::load(vb, &candle_config)?);
        Ok(())
    }

    /// Check if encoder weights are loaded
    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn config(&self) -> &T5EncoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Encode a prompt into sampler conditioning.
    ///
    /// `strength` scales the embeddings; 1.0 leaves them untouched.
    pub fn encode(
        &mut self,
        prompt: &str,
        strength: f64,
    ) -> Result<PromptConditioning, TextEncoderError> {
        if self.model.is_none() {
            return Err(TextEncoderError::ModelNotLoaded);
        }

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| TextEncoderError::Tokenizer(e.to_string()))?;
        let (ids, mask) = pad_and_mask(encoding.get_ids())?;

        let input_ids = Tensor::new(&ids[..], &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(&mask[..], &self.device)?.unsqueeze(0)?;

        let model = self.model.as_mut().expect("checked above");
        let embeds = model
            .forward(&input_ids)?
            .to_dtype(self.dtype)?
            .affine(strength, 0.0)?;

        Ok(PromptConditioning {
            embeds,
            attention_mask,
        })
    }
}
