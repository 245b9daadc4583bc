//! REST client for a model-serving process.
//!
//! [`ModelServerClient`] implements every collaborator trait by calling a
//! JSON/HTTP model server. Images and audio travel base64-encoded (PNG for
//! images, WAV for audio).
//!
//! | Endpoint            | Request                         | Response                          |
//! |---------------------|---------------------------------|-----------------------------------|
//! | `POST /translate`   | `{text, lang}`                  | `{text}`                          |
//! | `POST /generate`    | [`GenerateRequest`]             | `{images, nsfw_content_detected}` |
//! | `POST /upscale`     | `{image_url}` or `{image}`      | `{image}`                         |
//! | `POST /embed/images`| `{images}`                      | `{embeddings}`                    |
//! | `POST /embed/text`  | `{text}`                        | `{embedding}`                     |
//! | `POST /voiceover`   | [`VoiceRequest`]                | `{segments: [{audio, audio_duration, sample_rate}]}` |

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use genrelay_core::types::Embedding;
use image::{DynamicImage, ImageFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{
    AudioSegment, Embedder, GenerateRequest, Generation, ImageGenerator, ModelError, Translator,
    UpscaleInput, Upscaler, VoiceRequest, VoiceSynthesizer,
};

/// Inference calls can legitimately take minutes on a busy GPU.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TranslateBody<'a> {
    text: &'a str,
    lang: Option<&'a str>,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    images: Vec<String>,
    #[serde(default)]
    nsfw_content_detected: Option<Vec<bool>>,
}

#[derive(Serialize)]
struct UpscaleBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

#[derive(Deserialize)]
struct ImageResponse {
    image: String,
}

#[derive(Serialize)]
struct EmbedImagesBody {
    images: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embeddings: Vec<Embedding>,
}

#[derive(Serialize)]
struct EmbedTextBody<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Embedding,
}

#[derive(Deserialize)]
struct VoiceoverResponse {
    segments: Vec<SegmentBody>,
}

#[derive(Deserialize)]
struct SegmentBody {
    audio: String,
    audio_duration: f64,
    sample_rate: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for a single model server.
pub struct ModelServerClient {
    client: reqwest::Client,
    base_url: String,
}

impl ModelServerClient {
    /// Create a client for `base_url`, e.g. `http://gpu-host:5000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- private helpers ----

    /// POST `body` as JSON to `path` and parse the JSON response.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ModelError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ModelError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

/// Encode an image as base64 PNG.
pub fn encode_png_base64(image: &DynamicImage) -> Result<String, ModelError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ModelError::InvalidResponse(format!("cannot encode image: {e}")))?;
    Ok(STANDARD.encode(buf.into_inner()))
}

/// Decode a base64 image in any enabled format.
pub fn decode_image_base64(data: &str) -> Result<DynamicImage, ModelError> {
    let bytes = decode_base64(data)?;
    image::load_from_memory(&bytes)
        .map_err(|e| ModelError::InvalidResponse(format!("undecodable image: {e}")))
}

fn decode_base64(data: &str) -> Result<Vec<u8>, ModelError> {
    STANDARD
        .decode(data)
        .map_err(|e| ModelError::InvalidResponse(format!("invalid base64: {e}")))
}

#[async_trait]
impl Translator for ModelServerClient {
    async fn translate(&self, text: &str, lang_hint: Option<&str>) -> Result<String, ModelError> {
        let response: TextResponse = self
            .post_json(
                "/translate",
                &TranslateBody {
                    text,
                    lang: lang_hint,
                },
            )
            .await?;
        Ok(response.text)
    }
}

#[async_trait]
impl ImageGenerator for ModelServerClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ModelError> {
        let response: GenerateResponse = self.post_json("/generate", request).await?;

        if let Some(flags) = &response.nsfw_content_detected {
            if flags.len() != response.images.len() {
                return Err(ModelError::InvalidResponse(format!(
                    "{} NSFW flags for {} images",
                    flags.len(),
                    response.images.len()
                )));
            }
        }

        let images = response
            .images
            .iter()
            .map(|data| decode_image_base64(data))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Generation {
            images,
            nsfw_flags: response.nsfw_content_detected,
        })
    }
}

#[async_trait]
impl Upscaler for ModelServerClient {
    async fn upscale(&self, input: UpscaleInput) -> Result<DynamicImage, ModelError> {
        let body = match input {
            UpscaleInput::Url(url) => UpscaleBody {
                image_url: Some(url),
                image: None,
            },
            UpscaleInput::Image(image) => UpscaleBody {
                image_url: None,
                image: Some(encode_png_base64(&image)?),
            },
        };
        let response: ImageResponse = self.post_json("/upscale", &body).await?;
        decode_image_base64(&response.image)
    }
}

#[async_trait]
impl Embedder for ModelServerClient {
    async fn embed_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>, ModelError> {
        let images = images
            .iter()
            .map(encode_png_base64)
            .collect::<Result<Vec<_>, _>>()?;
        let response: EmbeddingsResponse = self
            .post_json("/embed/images", &EmbedImagesBody { images })
            .await?;
        Ok(response.embeddings)
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding, ModelError> {
        let response: EmbeddingResponse =
            self.post_json("/embed/text", &EmbedTextBody { text }).await?;
        Ok(response.embedding)
    }
}

#[async_trait]
impl VoiceSynthesizer for ModelServerClient {
    async fn synthesize(&self, request: &VoiceRequest) -> Result<Vec<AudioSegment>, ModelError> {
        let response: VoiceoverResponse = self.post_json("/voiceover", request).await?;
        response
            .segments
            .into_iter()
            .map(|segment| {
                Ok(AudioSegment {
                    wav_bytes: decode_base64(&segment.audio)?,
                    audio_duration: segment.audio_duration,
                    sample_rate: segment.sample_rate,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
