//! Collaborator contracts for the external models.
//!
//! The orchestrator only sequences these calls; how a model computes its
//! result is not its concern. Each model family is a separate trait so a
//! deployment can mix backends, and [`ModelSet`] bundles one of each.

use std::sync::Arc;

use async_trait::async_trait;
use genrelay_core::job::ImageJobInput;
use genrelay_core::types::Embedding;
use image::DynamicImage;
use serde::Serialize;

/// Errors raised by a model collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The HTTP request to the model server failed.
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The model server answered with a non-2xx status.
    #[error("model server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// The model answered, but not with what the contract promises.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// The model itself raised during inference.
    #[error("{0}")]
    Inference(String),
}

// ---------------------------------------------------------------------------
// Stage inputs and outputs
// ---------------------------------------------------------------------------

/// Parameters for one generation call, with prompts already translated.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub prompt_prefix: Option<String>,
    pub negative_prompt_prefix: Option<String>,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub init_image_url: Option<String>,
    pub mask_image_url: Option<String>,
    pub prompt_strength: f32,
    pub scheduler: Option<String>,
    pub seed: Option<u64>,
    pub model: Option<String>,
}

impl GenerateRequest {
    pub fn from_input(input: &ImageJobInput, prompt: String, negative_prompt: String) -> Self {
        Self {
            prompt,
            negative_prompt,
            prompt_prefix: input.prompt_prefix.clone(),
            negative_prompt_prefix: input.negative_prompt_prefix.clone(),
            width: input.width,
            height: input.height,
            num_outputs: input.num_outputs,
            num_inference_steps: input.num_inference_steps,
            guidance_scale: input.guidance_scale,
            init_image_url: input.init_image_url.clone(),
            mask_image_url: input.mask_image_url.clone(),
            prompt_strength: input.prompt_strength,
            scheduler: input.scheduler.clone(),
            seed: input.seed,
            model: input.model.clone(),
        }
    }
}

/// Raw generator output.
#[derive(Debug, Clone)]
pub struct Generation {
    pub images: Vec<DynamicImage>,
    /// Per-image NSFW flags, parallel to `images`. `None` when the model has
    /// no safety checker.
    pub nsfw_flags: Option<Vec<bool>>,
}

/// What to upscale.
#[derive(Debug, Clone)]
pub enum UpscaleInput {
    /// A caller-supplied image URL.
    Url(String),
    /// An image produced earlier in the same job.
    Image(DynamicImage),
}

/// Parameters for one voice synthesis call.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceRequest {
    pub prompt: String,
    pub speaker: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub seed: u64,
    pub denoise: bool,
}

/// One synthesized audio segment.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub wav_bytes: Vec<u8>,
    /// Seconds.
    pub audio_duration: f64,
    pub sample_rate: u32,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` to the generator's language. `lang_hint` is a
    /// FLORES-200 code overriding language detection.
    async fn translate(&self, text: &str, lang_hint: Option<&str>) -> Result<String, ModelError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ModelError>;
}

#[async_trait]
pub trait Upscaler: Send + Sync {
    async fn upscale(&self, input: UpscaleInput) -> Result<DynamicImage, ModelError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One embedding per image, in input order.
    async fn embed_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>, ModelError>;

    async fn embed_text(&self, text: &str) -> Result<Embedding, ModelError>;
}

#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &VoiceRequest) -> Result<Vec<AudioSegment>, ModelError>;
}

// ---------------------------------------------------------------------------
// ModelSet
// ---------------------------------------------------------------------------

/// One collaborator per model family.
#[derive(Clone)]
pub struct ModelSet {
    pub translator: Arc<dyn Translator>,
    pub generator: Arc<dyn ImageGenerator>,
    pub upscaler: Arc<dyn Upscaler>,
    pub embedder: Arc<dyn Embedder>,
    pub voice: Arc<dyn VoiceSynthesizer>,
}

impl ModelSet {
    /// Use a single backend for every model family.
    pub fn uniform<B>(backend: Arc<B>) -> Self
    where
        B: Translator + ImageGenerator + Upscaler + Embedder + VoiceSynthesizer + 'static,
    {
        Self {
            translator: backend.clone(),
            generator: backend.clone(),
            upscaler: backend.clone(),
            embedder: backend.clone(),
            voice: backend,
        }
    }
}
