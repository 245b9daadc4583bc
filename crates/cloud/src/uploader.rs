//! Artifact upload for finished jobs.
//!
//! [`ArtifactUploader::upload`] takes an envelope's pending artifacts,
//! encodes each one per its target, writes it to
//! `<upload_prefix>/<index>.<extension>` and records the resulting
//! references as the envelope's output. Side-channel metadata (embeddings,
//! audio duration, silence-trim parameters) is carried over unchanged.

use std::sync::Arc;
use std::time::Instant;

use genrelay_core::artifact::{AudioArtifact, ImageArtifact};
use genrelay_core::envelope::{
    ImageOutput, ImageResultEnvelope, UploadedAudio, UploadedImage, VoiceoverOutput,
    VoiceoverResultEnvelope,
};
use genrelay_core::ResultEnvelope;

use crate::encode::{encode_image, AudioTranscoder, EncodeError};
use crate::storage::{ObjectStore, StorageError};

/// Errors raised while uploading an envelope's artifacts.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Artifacts are pending but the envelope has no storage namespace.
    #[error("Envelope {0} has artifacts to upload but no upload prefix")]
    MissingPrefix(String),
}

/// Storage key for the artifact at `index`.
pub fn artifact_key(prefix: &str, index: usize, extension: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{index}.{extension}")
    } else {
        format!("{prefix}/{index}.{extension}")
    }
}

/// Encodes and uploads artifacts to a single [`ObjectStore`].
#[derive(Clone)]
pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    transcoder: AudioTranscoder,
}

impl ArtifactUploader {
    pub fn new(store: Arc<dyn ObjectStore>, transcoder: AudioTranscoder) -> Self {
        Self { store, transcoder }
    }

    /// Upload every pending artifact of `envelope` and set its output.
    ///
    /// The pending artifacts are moved out of the envelope before any
    /// upload starts, so on error the envelope no longer holds them.
    pub async fn upload(&self, envelope: &mut ResultEnvelope) -> Result<(), UploadError> {
        match envelope {
            ResultEnvelope::Image(env) => {
                let output = self.upload_for_image(env).await?;
                env.output = Some(output);
            }
            ResultEnvelope::Voiceover(env) => {
                let output = self.upload_for_voiceover(env).await?;
                env.output = Some(output);
            }
        }
        Ok(())
    }

    /// Upload images and assemble the image output.
    ///
    /// The prompt embedding is returned once, separately from the
    /// per-image embeddings.
    pub async fn upload_for_image(
        &self,
        env: &mut ImageResultEnvelope,
    ) -> Result<ImageOutput, UploadError> {
        let artifacts = std::mem::take(&mut env.upload_output);
        let prefix = env
            .header
            .upload_prefix
            .clone()
            .ok_or_else(|| UploadError::MissingPrefix(env.header.id.clone()))?;

        let mut images = Vec::with_capacity(artifacts.len());
        for (index, artifact) in artifacts.into_iter().enumerate() {
            images.push(self.upload_image(&prefix, index, artifact).await?);
        }

        Ok(ImageOutput {
            images,
            prompt_embed: env.prompt_embed.clone(),
            nsfw_count: env.nsfw_count,
        })
    }

    /// Upload audio segments and assemble the voiceover output.
    pub async fn upload_for_voiceover(
        &self,
        env: &mut VoiceoverResultEnvelope,
    ) -> Result<VoiceoverOutput, UploadError> {
        let artifacts = std::mem::take(&mut env.upload_output);
        let prefix = env
            .header
            .upload_prefix
            .clone()
            .ok_or_else(|| UploadError::MissingPrefix(env.header.id.clone()))?;

        let mut audio_files = Vec::with_capacity(artifacts.len());
        for (index, artifact) in artifacts.iter().enumerate() {
            audio_files.push(self.upload_audio(&prefix, index, artifact).await?);
        }

        Ok(VoiceoverOutput { audio_files })
    }

    async fn upload_image(
        &self,
        prefix: &str,
        index: usize,
        artifact: ImageArtifact,
    ) -> Result<UploadedImage, UploadError> {
        let started = Instant::now();
        let ImageArtifact {
            image,
            target,
            image_embed,
        } = artifact;

        // Encoding is CPU-bound; keep it off the async workers.
        let bytes = tokio::task::spawn_blocking(move || encode_image(&image, target))
            .await
            .map_err(|e| EncodeError::Join(e.to_string()))??;

        let key = artifact_key(prefix, index, target.extension.as_str());
        let size = bytes.len();
        let reference = self
            .store
            .put(&key, bytes, target.extension.content_type())
            .await?;

        tracing::debug!(
            key = %key,
            size,
            backend = self.store.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Uploaded image",
        );

        Ok(UploadedImage {
            image: reference,
            image_embed,
        })
    }

    async fn upload_audio(
        &self,
        prefix: &str,
        index: usize,
        artifact: &AudioArtifact,
    ) -> Result<UploadedAudio, UploadError> {
        let started = Instant::now();
        let bytes = self.transcoder.encode(artifact).await?;

        let key = artifact_key(prefix, index, artifact.target_extension.as_str());
        let size = bytes.len();
        let reference = self
            .store
            .put(&key, bytes, artifact.target_extension.content_type())
            .await?;

        tracing::debug!(
            key = %key,
            size,
            backend = self.store.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Uploaded audio",
        );

        Ok(UploadedAudio {
            audio_file: reference,
            audio_duration: artifact.audio_duration,
            sample_rate: artifact.sample_rate,
            denoised: artifact.denoised,
            remove_silence: artifact.remove_silence,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genrelay_core::artifact::ImageEncoding;
    use genrelay_core::job::{AudioExtension, ImageExtension, JobRouting, RemoveSilenceParams};
    use image::DynamicImage;

    use super::*;
    use crate::storage::LocalStore;

    fn routing(prefix: &str) -> JobRouting {
        JobRouting {
            id: "job-42".into(),
            webhook_url: "http://caller/hook".into(),
            upload_prefix: prefix.into(),
        }
    }

    fn image_artifact(embed: f32, extension: ImageExtension) -> ImageArtifact {
        ImageArtifact {
            image: DynamicImage::new_rgb8(4, 4),
            target: ImageEncoding {
                extension,
                quality: 80,
            },
            image_embed: Some(vec![embed]),
        }
    }

    fn uploader(dir: &tempfile::TempDir) -> ArtifactUploader {
        ArtifactUploader::new(
            Arc::new(LocalStore::new(dir.path().to_path_buf())),
            AudioTranscoder::new("/nonexistent/ffmpeg"),
        )
    }

    #[test]
    fn keys_follow_prefix_index_extension() {
        assert_eq!(artifact_key("jobs/1", 0, "png"), "jobs/1/0.png");
        assert_eq!(artifact_key("jobs/1/", 2, "mp3"), "jobs/1/2.mp3");
        assert_eq!(artifact_key("", 3, "wav"), "3.wav");
    }

    #[tokio::test]
    async fn uploads_images_in_order_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ImageResultEnvelope::new(&routing("results/job-42"));
        env.upload_output = vec![
            image_artifact(0.1, ImageExtension::Jpeg),
            image_artifact(0.2, ImageExtension::Jpeg),
        ];
        env.prompt_embed = Some(vec![9.0]);
        env.nsfw_count = 1;
        let mut envelope = ResultEnvelope::Image(env);

        uploader(&dir).upload(&mut envelope).await.unwrap();

        let env = assert_matches!(envelope, ResultEnvelope::Image(env) => env);
        assert!(env.upload_output.is_empty());
        let output = env.output.unwrap();
        assert_eq!(output.nsfw_count, 1);
        assert_eq!(output.prompt_embed, Some(vec![9.0]));
        assert_eq!(output.images.len(), 2);
        assert!(output.images[0].image.ends_with("results/job-42/0.jpeg"));
        assert!(output.images[1].image.ends_with("results/job-42/1.jpeg"));
        assert_eq!(output.images[0].image_embed, Some(vec![0.1]));
        assert_eq!(output.images[1].image_embed, Some(vec![0.2]));
        assert!(dir.path().join("results/job-42/1.jpeg").exists());
    }

    #[tokio::test]
    async fn voiceover_carries_silence_params_through() {
        let dir = tempfile::tempdir().unwrap();
        let params = RemoveSilenceParams {
            should_remove: false,
            min_silence_len: 700,
            silence_thresh: -30,
            keep_silence_len: 100,
        };
        let mut env = VoiceoverResultEnvelope::new(&routing("vo/1"));
        env.upload_output = vec![AudioArtifact {
            wav_bytes: vec![1, 2, 3, 4],
            target_extension: AudioExtension::Wav,
            audio_duration: 2.25,
            sample_rate: 24_000,
            denoised: false,
            remove_silence: params,
        }];
        let mut envelope = ResultEnvelope::Voiceover(env);

        uploader(&dir).upload(&mut envelope).await.unwrap();

        let env = assert_matches!(envelope, ResultEnvelope::Voiceover(env) => env);
        let files = env.output.unwrap().audio_files;
        assert_eq!(files.len(), 1);
        assert!(files[0].audio_file.ends_with("vo/1/0.wav"));
        assert_eq!(files[0].audio_duration, 2.25);
        assert_eq!(files[0].sample_rate, 24_000);
        assert_eq!(files[0].remove_silence, params);
        assert_eq!(std::fs::read(dir.path().join("vo/1/0.wav")).unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn missing_prefix_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ImageResultEnvelope::new(&routing("p"));
        env.header.upload_prefix = None;
        env.upload_output = vec![image_artifact(0.0, ImageExtension::Png)];
        let mut envelope = ResultEnvelope::Image(env);

        let result = uploader(&dir).upload(&mut envelope).await;

        assert_matches!(result, Err(UploadError::MissingPrefix(ref id)) if id == "job-42");
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ImageResultEnvelope::new(&routing("../escape"));
        env.upload_output = vec![image_artifact(0.0, ImageExtension::Png)];
        let mut envelope = ResultEnvelope::Image(env);

        let result = uploader(&dir).upload(&mut envelope).await;

        assert_matches!(result, Err(UploadError::Storage(StorageError::InvalidKey(_))));
    }
}
