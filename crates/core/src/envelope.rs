//! Result envelopes and the webhook payload they become.
//!
//! A [`ResultEnvelope`] is created by the orchestrator, travels through the
//! delivery queue and is finally consumed by the upload worker. It carries
//! two internal-only fields, `upload_output` (artifacts awaiting upload) and
//! `upload_prefix` (their storage namespace). Neither exists on
//! [`DeliveryPayload`], so they cannot reach the wire.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artifact::{AudioArtifact, ImageArtifact};
use crate::job::{JobKind, JobRouting, RemoveSilenceParams};
use crate::types::{Embedding, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Job status as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Processing,
    Succeeded,
    Failed,
}

// ---------------------------------------------------------------------------
// Delivered output shapes
// ---------------------------------------------------------------------------

/// One uploaded image as reported on the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedImage {
    /// Storage reference (URL or key) returned by the backend.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_embed: Option<Embedding>,
}

/// Output of an image job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub images: Vec<UploadedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_embed: Option<Embedding>,
    /// Number of generated images dropped by the NSFW filter.
    pub nsfw_count: u32,
}

/// One uploaded audio file as reported on the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedAudio {
    pub audio_file: String,
    pub audio_duration: f64,
    pub sample_rate: u32,
    pub denoised: bool,
    pub remove_silence: RemoveSilenceParams,
}

/// Output of a voiceover job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceoverOutput {
    pub audio_files: Vec<UploadedAudio>,
}

/// Kind-specific output carried by [`DeliveryPayload`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeliveryOutput {
    Image(ImageOutput),
    Voiceover(VoiceoverOutput),
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// The JSON body POSTed to the caller's webhook.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload {
    pub id: JobId,
    pub job_kind: JobKind,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<DeliveryOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub webhook_url: String,
    pub created_at: Timestamp,
    pub completed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Envelope header
// ---------------------------------------------------------------------------

/// Status, error and routing shared by every envelope kind.
#[derive(Debug, Clone)]
pub struct EnvelopeHeader {
    pub id: JobId,
    pub status: Status,
    pub error: Option<String>,
    pub webhook_url: String,
    /// Internal: storage namespace for `upload_output`.
    pub upload_prefix: Option<String>,
    pub created_at: Timestamp,
}

impl EnvelopeHeader {
    pub fn from_routing(routing: &JobRouting) -> Self {
        Self {
            id: routing.id.clone(),
            status: Status::Processing,
            error: None,
            webhook_url: routing.webhook_url.clone(),
            upload_prefix: Some(routing.upload_prefix.clone()),
            created_at: Utc::now(),
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = Status::Failed;
        self.error = Some(error.into());
    }

    /// Promote a still-processing job to succeeded. A failed job stays failed.
    pub fn mark_succeeded(&mut self) {
        if self.status == Status::Processing {
            self.status = Status::Succeeded;
        }
    }

    fn to_payload(&self, job_kind: JobKind, output: Option<DeliveryOutput>) -> DeliveryPayload {
        let output = match self.status {
            Status::Succeeded => output,
            Status::Processing | Status::Failed => None,
        };
        DeliveryPayload {
            id: self.id.clone(),
            job_kind,
            status: self.status,
            output,
            error: self.error.clone(),
            webhook_url: self.webhook_url.clone(),
            created_at: self.created_at,
            completed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Deliverable
// ---------------------------------------------------------------------------

/// Capability shared by every envelope kind: report status, drop internal
/// fields and produce the wire payload.
pub trait Deliverable {
    fn job_kind(&self) -> JobKind;

    fn header(&self) -> &EnvelopeHeader;

    fn header_mut(&mut self) -> &mut EnvelopeHeader;

    /// Number of artifacts still waiting for upload.
    fn pending_uploads(&self) -> usize;

    /// Forget any output assembled so far.
    fn clear_output(&mut self);

    /// Remove `upload_output` and `upload_prefix`.
    fn strip_internal(&mut self);

    fn to_delivery_payload(&self) -> DeliveryPayload;

    fn mark_failed(&mut self, error: impl Into<String>)
    where
        Self: Sized,
    {
        self.header_mut().mark_failed(error);
        self.clear_output();
    }
}

// ---------------------------------------------------------------------------
// Image envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ImageResultEnvelope {
    pub header: EnvelopeHeader,
    /// Internal: images awaiting upload.
    pub upload_output: Vec<ImageArtifact>,
    /// Embedding of the translated prompt, computed once per request.
    pub prompt_embed: Option<Embedding>,
    pub nsfw_count: u32,
    /// Set by the upload worker once artifacts have storage references.
    pub output: Option<ImageOutput>,
}

impl ImageResultEnvelope {
    pub fn new(routing: &JobRouting) -> Self {
        Self {
            header: EnvelopeHeader::from_routing(routing),
            upload_output: Vec::new(),
            prompt_embed: None,
            nsfw_count: 0,
            output: None,
        }
    }
}

impl Deliverable for ImageResultEnvelope {
    fn job_kind(&self) -> JobKind {
        JobKind::Image
    }

    fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EnvelopeHeader {
        &mut self.header
    }

    fn pending_uploads(&self) -> usize {
        self.upload_output.len()
    }

    fn clear_output(&mut self) {
        self.output = None;
    }

    fn strip_internal(&mut self) {
        self.upload_output = Vec::new();
        self.header.upload_prefix = None;
    }

    fn to_delivery_payload(&self) -> DeliveryPayload {
        // A successful job whose images were all filtered still reports an
        // (empty) image list alongside its nsfw_count.
        let output = self.output.clone().unwrap_or_else(|| ImageOutput {
            images: Vec::new(),
            prompt_embed: self.prompt_embed.clone(),
            nsfw_count: self.nsfw_count,
        });
        self.header
            .to_payload(JobKind::Image, Some(DeliveryOutput::Image(output)))
    }
}

// ---------------------------------------------------------------------------
// Voiceover envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VoiceoverResultEnvelope {
    pub header: EnvelopeHeader,
    /// Internal: audio segments awaiting upload.
    pub upload_output: Vec<AudioArtifact>,
    pub output: Option<VoiceoverOutput>,
}

impl VoiceoverResultEnvelope {
    pub fn new(routing: &JobRouting) -> Self {
        Self {
            header: EnvelopeHeader::from_routing(routing),
            upload_output: Vec::new(),
            output: None,
        }
    }
}

impl Deliverable for VoiceoverResultEnvelope {
    fn job_kind(&self) -> JobKind {
        JobKind::Voiceover
    }

    fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EnvelopeHeader {
        &mut self.header
    }

    fn pending_uploads(&self) -> usize {
        self.upload_output.len()
    }

    fn clear_output(&mut self) {
        self.output = None;
    }

    fn strip_internal(&mut self) {
        self.upload_output = Vec::new();
        self.header.upload_prefix = None;
    }

    fn to_delivery_payload(&self) -> DeliveryPayload {
        let output = self.output.clone().unwrap_or(VoiceoverOutput {
            audio_files: Vec::new(),
        });
        self.header
            .to_payload(JobKind::Voiceover, Some(DeliveryOutput::Voiceover(output)))
    }
}

// ---------------------------------------------------------------------------
// ResultEnvelope
// ---------------------------------------------------------------------------

/// Any envelope that can travel through the delivery queue.
#[derive(Debug, Clone)]
pub enum ResultEnvelope {
    Image(ImageResultEnvelope),
    Voiceover(VoiceoverResultEnvelope),
}

impl ResultEnvelope {
    pub fn id(&self) -> &str {
        &self.header().id
    }

    pub fn status(&self) -> Status {
        self.header().status
    }
}

impl Deliverable for ResultEnvelope {
    fn job_kind(&self) -> JobKind {
        match self {
            Self::Image(env) => env.job_kind(),
            Self::Voiceover(env) => env.job_kind(),
        }
    }

    fn header(&self) -> &EnvelopeHeader {
        match self {
            Self::Image(env) => &env.header,
            Self::Voiceover(env) => &env.header,
        }
    }

    fn header_mut(&mut self) -> &mut EnvelopeHeader {
        match self {
            Self::Image(env) => &mut env.header,
            Self::Voiceover(env) => &mut env.header,
        }
    }

    fn pending_uploads(&self) -> usize {
        match self {
            Self::Image(env) => env.pending_uploads(),
            Self::Voiceover(env) => env.pending_uploads(),
        }
    }

    fn clear_output(&mut self) {
        match self {
            Self::Image(env) => env.clear_output(),
            Self::Voiceover(env) => env.clear_output(),
        }
    }

    fn strip_internal(&mut self) {
        match self {
            Self::Image(env) => env.strip_internal(),
            Self::Voiceover(env) => env.strip_internal(),
        }
    }

    fn to_delivery_payload(&self) -> DeliveryPayload {
        match self {
            Self::Image(env) => env.to_delivery_payload(),
            Self::Voiceover(env) => env.to_delivery_payload(),
        }
    }
}

impl From<ImageResultEnvelope> for ResultEnvelope {
    fn from(env: ImageResultEnvelope) -> Self {
        Self::Image(env)
    }
}

impl From<VoiceoverResultEnvelope> for ResultEnvelope {
    fn from(env: VoiceoverResultEnvelope) -> Self {
        Self::Voiceover(env)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
