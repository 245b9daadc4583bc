//! Per-request control flow.
//!
//! [`PredictionOrchestrator::run`] executes a job's stages against the
//! [`ModelSet`] and always returns a [`ResultEnvelope`]: a stage error
//! becomes a `failed` envelope rather than an `Err`, so every job is
//! delivered.
//!
//! Image jobs:
//!
//! | `process_type`         | Stages                                         |
//! |------------------------|------------------------------------------------|
//! | `generate`             | translate, generate, NSFW filter, embed        |
//! | `upscale`              | upscale `image_to_upscale`                     |
//! | `generate_and_upscale` | as `generate`, then upscale each survivor      |
//!
//! Voiceover jobs run a single synthesize stage.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use genrelay_core::artifact::{AudioArtifact, ImageArtifact, ImageEncoding};
use genrelay_core::envelope::{ImageResultEnvelope, VoiceoverResultEnvelope};
use genrelay_core::job::{ImageJob, ImageJobInput, ProcessType, VoiceoverJob, VoiceoverJobInput};
use genrelay_core::types::Embedding;
use genrelay_core::{Deliverable, Job, ResultEnvelope};
use image::DynamicImage;
use tracing::Instrument;

use crate::models::{GenerateRequest, ModelError, ModelSet, UpscaleInput, VoiceRequest};
use crate::queue::{DeliveryQueueSender, QueueError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A named step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Translate,
    Generate,
    Embed,
    Upscale,
    Synthesize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Generate => "generate",
            Self::Embed => "embed",
            Self::Upscale => "upscale",
            Self::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a job early.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: ModelError,
    },

    #[error("process_type 'upscale' requires image_to_upscale")]
    MissingUpscaleInput,
}

impl PipelineError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Stage { stage, .. } => *stage,
            Self::MissingUpscaleInput => Stage::Upscale,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drop flagged items, keeping survivors in order.
///
/// Returns the survivors and the number dropped. `None` flags, or a flag
/// list shorter than `items`, count as "not flagged".
pub fn filter_nsfw<T>(items: Vec<T>, flags: Option<&[bool]>) -> (Vec<T>, u32) {
    let Some(flags) = flags else {
        return (items, 0);
    };

    let mut flagged = 0;
    let survivors = items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            if flags.get(i).copied().unwrap_or(false) {
                flagged += 1;
                None
            } else {
                Some(item)
            }
        })
        .collect();
    (survivors, flagged)
}

/// Await one stage, log how long it took and tag any error with the stage.
async fn timed<T, F>(stage: Stage, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, ModelError>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => tracing::info!(stage = %stage, elapsed_ms, "Stage completed"),
        Err(e) => tracing::warn!(stage = %stage, elapsed_ms, error = %e, "Stage failed"),
    }
    result.map_err(|source| PipelineError::Stage { stage, source })
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// What an image job produced, before upload.
#[derive(Debug, Clone, Default)]
pub struct ImagePrediction {
    pub artifacts: Vec<ImageArtifact>,
    pub prompt_embed: Option<Embedding>,
    pub nsfw_count: u32,
}

/// Runs jobs against a fixed set of model collaborators.
#[derive(Clone)]
pub struct PredictionOrchestrator {
    models: ModelSet,
}

impl PredictionOrchestrator {
    pub fn new(models: ModelSet) -> Self {
        Self { models }
    }

    /// Run `job` to completion and hand its envelope to the delivery queue.
    ///
    /// Fails only when the queue's consumer is gone; the envelope is then
    /// returned inside the error.
    pub async fn submit(&self, job: Job, queue: &DeliveryQueueSender) -> Result<(), QueueError> {
        let envelope = self.run(job).await;
        queue.push(envelope).await
    }

    /// Run every stage of `job` and build its result envelope.
    pub async fn run(&self, job: Job) -> ResultEnvelope {
        let span = tracing::info_span!("job", job_id = %job.id(), kind = job.kind().as_str());
        async move {
            match job {
                Job::Image(job) => self.run_image(job).await.into(),
                Job::Voiceover(job) => self.run_voiceover(job).await.into(),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_image(&self, job: ImageJob) -> ImageResultEnvelope {
        let started = Instant::now();
        let mut env = ImageResultEnvelope::new(&job.routing);
        tracing::info!(process_type = ?job.input.process_type, "Image job started");

        match self.predict_image(&job.input).await {
            Ok(prediction) => {
                tracing::info!(
                    images = prediction.artifacts.len(),
                    nsfw_count = prediction.nsfw_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Image job completed",
                );
                env.upload_output = prediction.artifacts;
                env.prompt_embed = prediction.prompt_embed;
                env.nsfw_count = prediction.nsfw_count;
                env.header.mark_succeeded();
            }
            Err(e) => {
                tracing::error!(error = %e, "Image job failed");
                env.mark_failed(e.to_string());
            }
        }
        env
    }

    async fn run_voiceover(&self, job: VoiceoverJob) -> VoiceoverResultEnvelope {
        let started = Instant::now();
        let mut env = VoiceoverResultEnvelope::new(&job.routing);

        match self.predict_voiceover(&job.input).await {
            Ok(artifacts) => {
                tracing::info!(
                    segments = artifacts.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Voiceover job completed",
                );
                env.upload_output = artifacts;
                env.header.mark_succeeded();
            }
            Err(e) => {
                tracing::error!(error = %e, "Voiceover job failed");
                env.mark_failed(e.to_string());
            }
        }
        env
    }

    /// Execute the image stages selected by `input.process_type`.
    pub async fn predict_image(
        &self,
        input: &ImageJobInput,
    ) -> Result<ImagePrediction, PipelineError> {
        let target = ImageEncoding {
            extension: input.output_image_extension,
            quality: input.output_image_quality,
        };
        let mut images: Vec<DynamicImage> = Vec::new();
        let mut image_embeds: Option<Vec<Embedding>> = None;
        let mut prompt_embed = None;
        let mut nsfw_count = 0;

        if input.process_type.generates() {
            let (prompt, negative_prompt) = self.translate_prompts(input).await?;
            let request = GenerateRequest::from_input(input, prompt, negative_prompt);
            tracing::info!(
                width = request.width,
                height = request.height,
                steps = request.num_inference_steps,
                outputs = request.num_outputs,
                model = ?request.model,
                "Generating",
            );

            let generation = timed(Stage::Generate, self.models.generator.generate(&request)).await?;
            let (survivors, flagged) =
                filter_nsfw(generation.images, generation.nsfw_flags.as_deref());
            nsfw_count = flagged;

            prompt_embed = Some(
                timed(
                    Stage::Embed,
                    self.models.embedder.embed_text(&request.prompt),
                )
                .await?,
            );
            image_embeds = Some(self.embed_survivors(&survivors).await?);
            images = survivors;
        }

        if input.process_type.upscales() {
            images = self.upscale(input, images).await?;
        }

        let mut embeds = image_embeds.map(Vec::into_iter);
        let artifacts = images
            .into_iter()
            .map(|image| ImageArtifact {
                image,
                target,
                image_embed: embeds.as_mut().and_then(Iterator::next),
            })
            .collect();

        Ok(ImagePrediction {
            artifacts,
            prompt_embed,
            nsfw_count,
        })
    }

    /// Execute the voiceover stage. A missing seed is replaced by a random
    /// 16-bit value.
    pub async fn predict_voiceover(
        &self,
        input: &VoiceoverJobInput,
    ) -> Result<Vec<AudioArtifact>, PipelineError> {
        let request = VoiceRequest {
            prompt: input.prompt.clone(),
            speaker: input.speaker.clone(),
            model: input.model.clone(),
            temperature: input.temperature,
            seed: input
                .seed
                .unwrap_or_else(|| u64::from(rand::random::<u16>())),
            denoise: input.denoise_audio,
        };
        tracing::info!(
            seed = request.seed,
            speaker = ?request.speaker,
            model = ?request.model,
            temperature = request.temperature,
            extension = input.output_audio_extension.as_str(),
            "Synthesizing voiceover",
        );

        let segments = timed(Stage::Synthesize, self.models.voice.synthesize(&request)).await?;
        let remove_silence = input.remove_silence_params();

        Ok(segments
            .into_iter()
            .map(|segment| AudioArtifact {
                wav_bytes: segment.wav_bytes,
                target_extension: input.output_audio_extension,
                audio_duration: segment.audio_duration,
                sample_rate: segment.sample_rate,
                denoised: input.denoise_audio,
                remove_silence,
            })
            .collect())
    }

    // ---- private stages ----

    /// Translate the prompt and negative prompt. Empty texts are passed
    /// through without a translator call.
    async fn translate_prompts(&self, input: &ImageJobInput) -> Result<(String, String), PipelineError> {
        let translator = &self.models.translator;
        timed(Stage::Translate, async {
            let prompt = if input.prompt.is_empty() {
                String::new()
            } else {
                translator
                    .translate(&input.prompt, input.prompt_flores_200_code.as_deref())
                    .await?
            };
            let negative_prompt = if input.negative_prompt.is_empty() {
                String::new()
            } else {
                translator
                    .translate(
                        &input.negative_prompt,
                        input.negative_prompt_flores_200_code.as_deref(),
                    )
                    .await?
            };
            Ok::<_, ModelError>((prompt, negative_prompt))
        })
        .await
    }

    /// One embedding per surviving image; no call when nothing survived.
    async fn embed_survivors(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>, PipelineError> {
        if images.is_empty() {
            tracing::info!("No images survived filtering, skipping image embeddings");
            return Ok(Vec::new());
        }

        timed(Stage::Embed, async {
            let embeds = self.models.embedder.embed_images(images).await?;
            if embeds.len() != images.len() {
                return Err(ModelError::InvalidResponse(format!(
                    "expected {} image embeddings, got {}",
                    images.len(),
                    embeds.len()
                )));
            }
            Ok(embeds)
        })
        .await
    }

    async fn upscale(
        &self,
        input: &ImageJobInput,
        images: Vec<DynamicImage>,
    ) -> Result<Vec<DynamicImage>, PipelineError> {
        let upscaler = &self.models.upscaler;

        if input.process_type == ProcessType::Upscale {
            let url = input
                .image_to_upscale
                .clone()
                .ok_or(PipelineError::MissingUpscaleInput)?;
            let image = timed(Stage::Upscale, upscaler.upscale(UpscaleInput::Url(url))).await?;
            return Ok(vec![image]);
        }

        timed(Stage::Upscale, async {
            let mut upscaled = Vec::with_capacity(images.len());
            for image in images {
                upscaled.push(upscaler.upscale(UpscaleInput::Image(image)).await?);
            }
            Ok::<_, ModelError>(upscaled)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
