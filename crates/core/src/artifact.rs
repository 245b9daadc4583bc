//! In-memory media produced by the models and not yet uploaded.
//!
//! Artifacts travel inside a result envelope's internal `upload_output`
//! and are replaced by storage references once the upload worker has
//! pushed them to blob storage.

use image::DynamicImage;

use crate::job::{AudioExtension, ImageExtension, RemoveSilenceParams};
use crate::types::Embedding;

/// How an image artifact should be encoded before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageEncoding {
    pub extension: ImageExtension,
    /// 1-100; only honoured by lossy encoders.
    pub quality: u8,
}

/// One generated (or upscaled) image.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub image: DynamicImage,
    pub target: ImageEncoding,
    /// Per-image embedding; `None` when embedding was not run (upscale-only).
    pub image_embed: Option<Embedding>,
}

/// One synthesized audio segment.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    /// WAV-encoded audio as produced by the synthesizer.
    pub wav_bytes: Vec<u8>,
    pub target_extension: AudioExtension,
    /// Seconds.
    pub audio_duration: f64,
    pub sample_rate: u32,
    pub denoised: bool,
    pub remove_silence: RemoveSilenceParams,
}
