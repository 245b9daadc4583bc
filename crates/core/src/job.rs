//! Inbound job descriptions.
//!
//! A [`Job`] is deserialized from the intake request body. The `kind`
//! field selects the variant; routing fields (`id`, `webhook_url`,
//! `upload_prefix`) are shared by both kinds and live in [`JobRouting`].
//! Stage parameters are opaque to the orchestrator beyond the handful of
//! fields that select stages or artifact encodings.

use serde::{Deserialize, Serialize};

use crate::types::JobId;

// ---------------------------------------------------------------------------
// Job kind
// ---------------------------------------------------------------------------

/// Which family of models a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Image,
    Voiceover,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voiceover => "voiceover",
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Caller-defined delivery routing shared by every job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRouting {
    /// Echoed back on the webhook so the caller can correlate results.
    #[serde(default = "new_job_id")]
    pub id: JobId,
    /// Where the result notification is POSTed.
    pub webhook_url: String,
    /// Storage namespace artifacts are written under.
    pub upload_prefix: String,
}

fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One inference request, consumed exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Image(ImageJob),
    Voiceover(VoiceoverJob),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Image(_) => JobKind::Image,
            Self::Voiceover(_) => JobKind::Voiceover,
        }
    }

    pub fn routing(&self) -> &JobRouting {
        match self {
            Self::Image(job) => &job.routing,
            Self::Voiceover(job) => &job.routing,
        }
    }

    pub fn id(&self) -> &str {
        &self.routing().id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJob {
    #[serde(flatten)]
    pub routing: JobRouting,
    #[serde(flatten)]
    pub input: ImageJobInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceoverJob {
    #[serde(flatten)]
    pub routing: JobRouting,
    #[serde(flatten)]
    pub input: VoiceoverJobInput,
}

// ---------------------------------------------------------------------------
// Image parameters
// ---------------------------------------------------------------------------

/// Which image stages to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    /// translate -> generate -> embed
    #[default]
    Generate,
    /// Upscale `image_to_upscale` only.
    Upscale,
    /// generate (with embed), then upscale every surviving image.
    GenerateAndUpscale,
}

impl ProcessType {
    pub fn generates(self) -> bool {
        matches!(self, Self::Generate | Self::GenerateAndUpscale)
    }

    pub fn upscales(self) -> bool {
        matches!(self, Self::Upscale | Self::GenerateAndUpscale)
    }
}

/// Target image container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageExtension {
    Png,
    #[default]
    Jpeg,
    Webp,
}

impl ImageExtension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

/// Parameters for an image job. Defaults match the public API docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJobInput {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    /// Upper bound on delivered images; NSFW filtering may deliver fewer.
    #[serde(default = "default_num_outputs")]
    pub num_outputs: u32,
    #[serde(default)]
    pub init_image_url: Option<String>,
    #[serde(default)]
    pub mask_image_url: Option<String>,
    #[serde(default = "default_prompt_strength")]
    pub prompt_strength: f32,
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
    #[serde(default)]
    pub scheduler: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// FLORES-200 code overriding language auto-detection for `prompt`.
    #[serde(default)]
    pub prompt_flores_200_code: Option<String>,
    #[serde(default)]
    pub negative_prompt_flores_200_code: Option<String>,
    #[serde(default)]
    pub prompt_prefix: Option<String>,
    #[serde(default)]
    pub negative_prompt_prefix: Option<String>,
    #[serde(default)]
    pub output_image_extension: ImageExtension,
    #[serde(default = "default_image_quality")]
    pub output_image_quality: u8,
    #[serde(default)]
    pub image_to_upscale: Option<String>,
    #[serde(default)]
    pub process_type: ProcessType,
}

fn default_dimension() -> u32 {
    512
}

fn default_num_outputs() -> u32 {
    1
}

fn default_prompt_strength() -> f32 {
    0.6
}

fn default_inference_steps() -> u32 {
    30
}

fn default_guidance_scale() -> f32 {
    7.5
}

fn default_image_quality() -> u8 {
    90
}

// ---------------------------------------------------------------------------
// Voiceover parameters
// ---------------------------------------------------------------------------

/// Target audio container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioExtension {
    #[default]
    Mp3,
    Wav,
}

impl AudioExtension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
        }
    }
}

/// Silence-trimming settings forwarded untouched to the delivery payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSilenceParams {
    pub should_remove: bool,
    /// Milliseconds.
    pub min_silence_len: u32,
    /// dBFS.
    pub silence_thresh: i32,
    /// Milliseconds of silence added back around kept chunks.
    pub keep_silence_len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceoverJobInput {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub output_audio_extension: AudioExtension,
    #[serde(default = "default_true")]
    pub denoise_audio: bool,
    #[serde(default = "default_true")]
    pub remove_silence: bool,
    #[serde(default = "default_min_silence_len")]
    pub remove_silence_min_silence_len: u32,
    #[serde(default = "default_silence_thresh")]
    pub remove_silence_silence_thresh: i32,
    #[serde(default = "default_keep_silence_len")]
    pub remove_silence_keep_silence_len: u32,
}

impl VoiceoverJobInput {
    pub fn remove_silence_params(&self) -> RemoveSilenceParams {
        RemoveSilenceParams {
            should_remove: self.remove_silence,
            min_silence_len: self.remove_silence_min_silence_len,
            silence_thresh: self.remove_silence_silence_thresh,
            keep_silence_len: self.remove_silence_keep_silence_len,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_min_silence_len() -> u32 {
    500
}

fn default_silence_thresh() -> i32 {
    -45
}

fn default_keep_silence_len() -> u32 {
    250
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
