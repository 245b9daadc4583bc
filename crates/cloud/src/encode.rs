//! Artifact encoding ahead of upload.
//!
//! Images are encoded in-process with the `image` crate. Audio arrives as
//! WAV from the synthesizer; WAV targets are uploaded as-is and MP3 targets
//! are transcoded by piping the WAV through `ffmpeg`.

use std::process::Stdio;

use genrelay_core::artifact::{AudioArtifact, ImageEncoding};
use genrelay_core::job::{AudioExtension, ImageExtension};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::DynamicImage;
use tokio::io::AsyncWriteExt;

/// Default ffmpeg binary, resolved through `PATH`.
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// LAME VBR quality passed to ffmpeg (`-q:a`); 2 is roughly 190 kbit/s.
const MP3_VBR_QUALITY: &str = "2";

/// Error type for encoding and transcoding.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("ffmpeg binary not found at '{path}': {source}")]
    FfmpegNotFound {
        path: String,
        source: std::io::Error,
    },

    #[error("ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    FfmpegFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder task failed: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Encode `image` into the target container.
///
/// JPEG honours `quality` (clamped to 1-100) and drops alpha. PNG and WebP
/// are lossless.
pub fn encode_image(image: &DynamicImage, target: ImageEncoding) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    match target.extension {
        ImageExtension::Jpeg => {
            let quality = target.quality.clamp(1, 100);
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
        ImageExtension::Png => {
            image.write_with_encoder(PngEncoder::new(&mut buf))?;
        }
        ImageExtension::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))?;
        }
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Produces the uploaded bytes for an audio artifact.
#[derive(Debug, Clone)]
pub struct AudioTranscoder {
    ffmpeg_path: String,
}

impl Default for AudioTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_PATH)
    }
}

impl AudioTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Bytes to upload for `artifact` in its target container.
    pub async fn encode(&self, artifact: &AudioArtifact) -> Result<Vec<u8>, EncodeError> {
        match artifact.target_extension {
            AudioExtension::Wav => Ok(artifact.wav_bytes.clone()),
            AudioExtension::Mp3 => self.wav_to_mp3(&artifact.wav_bytes).await,
        }
    }

    /// Pipe WAV bytes through ffmpeg and collect the MP3 output.
    async fn wav_to_mp3(&self, wav: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut child = tokio::process::Command::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "wav",
                "-i",
                "pipe:0",
                "-codec:a",
                "libmp3lame",
                "-q:a",
                MP3_VBR_QUALITY,
                "-f",
                "mp3",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncodeError::FfmpegNotFound {
                path: self.ffmpeg_path.clone(),
                source,
            })?;

        // Feed stdin from its own task so a full stdout pipe cannot deadlock us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Join("ffmpeg stdin was not captured".into()))?;
        let input = wav.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        let write_result = writer
            .await
            .map_err(|e| EncodeError::Join(e.to_string()))?;

        if !output.status.success() {
            return Err(EncodeError::FfmpegFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        write_result?;

        Ok(output.stdout)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genrelay_core::job::RemoveSilenceParams;
    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 6, Rgba([200, 10, 10, 128])))
    }

    fn audio(target_extension: AudioExtension) -> AudioArtifact {
        AudioArtifact {
            wav_bytes: b"RIFF....WAVE".to_vec(),
            target_extension,
            audio_duration: 1.5,
            sample_rate: 24_000,
            denoised: true,
            remove_silence: RemoveSilenceParams {
                should_remove: true,
                min_silence_len: 500,
                silence_thresh: -45,
                keep_silence_len: 250,
            },
        }
    }

    #[test]
    fn encodes_each_image_format() {
        for (extension, format) in [
            (ImageExtension::Png, ImageFormat::Png),
            (ImageExtension::Jpeg, ImageFormat::Jpeg),
            (ImageExtension::Webp, ImageFormat::WebP),
        ] {
            let bytes = encode_image(
                &sample_image(),
                ImageEncoding {
                    extension,
                    quality: 90,
                },
            )
            .unwrap();

            assert_eq!(image::guess_format(&bytes).unwrap(), format);
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (8, 6));
        }
    }

    #[test]
    fn jpeg_quality_affects_size() {
        let noisy = DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }));
        let low = encode_image(
            &noisy,
            ImageEncoding {
                extension: ImageExtension::Jpeg,
                quality: 10,
            },
        )
        .unwrap();
        let high = encode_image(
            &noisy,
            ImageEncoding {
                extension: ImageExtension::Jpeg,
                quality: 100,
            },
        )
        .unwrap();
        assert!(low.len() < high.len());
    }

    #[tokio::test]
    async fn wav_target_is_passed_through() {
        let transcoder = AudioTranscoder::new("/nonexistent/ffmpeg");
        let bytes = transcoder.encode(&audio(AudioExtension::Wav)).await.unwrap();
        assert_eq!(bytes, b"RIFF....WAVE".to_vec());
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_reported() {
        let transcoder = AudioTranscoder::new("/nonexistent/ffmpeg");
        let result = transcoder.encode(&audio(AudioExtension::Mp3)).await;
        assert_matches!(result, Err(EncodeError::FfmpegNotFound { ref path, .. }) if path == "/nonexistent/ffmpeg");
    }
}
