#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use genrelay_cloud::encode::AudioTranscoder;
use genrelay_cloud::storage::LocalStore;
use genrelay_cloud::{ArtifactUploader, ObjectStore, StorageError};
use genrelay_core::artifact::{ImageArtifact, ImageEncoding};
use genrelay_core::envelope::ImageResultEnvelope;
use genrelay_core::job::{ImageExtension, JobRouting};
use genrelay_core::types::Embedding;
use genrelay_core::ResultEnvelope;
use genrelay_events::{WebhookConfig, WebhookDelivery};
use genrelay_pipeline::models::{
    AudioSegment, Embedder, GenerateRequest, Generation, ImageGenerator, ModelError, Translator,
    UpscaleInput, Upscaler, VoiceRequest, VoiceSynthesizer,
};
use http_body_util::BodyExt;
use image::DynamicImage;
use serde_json::Value;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Webhook receiver
// ---------------------------------------------------------------------------

/// Bodies received by a mock webhook endpoint, in arrival order.
pub type Received = Arc<Mutex<Vec<Value>>>;

/// Spawn a webhook receiver that answers every POST with `status`.
pub async fn spawn_receiver(status: StatusCode) -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/hook", post(hook))
        .with_state((received.clone(), status));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), received)
}

async fn hook(State((received, status)): State<(Received, StatusCode)>, body: String) -> StatusCode {
    received
        .lock()
        .unwrap()
        .push(serde_json::from_str(&body).unwrap_or(Value::Null));
    status
}

/// Wait until `received` holds at least `count` bodies, or panic after `within`.
pub async fn wait_for_deliveries(received: &Received, count: usize, within: Duration) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        {
            let bodies = received.lock().unwrap();
            if bodies.len() >= count {
                return bodies.clone();
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {count} webhook deliveries within {within:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Webhook client with a short backoff so retry tests stay fast.
pub fn webhook() -> WebhookDelivery {
    WebhookDelivery::new(WebhookConfig {
        secret: "test-secret".into(),
        backoff_step: Duration::from_millis(5),
        ..Default::default()
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// A store that rejects every write.
#[derive(Default)]
pub struct FailingStore {
    pub attempts: Mutex<usize>,
}

#[async_trait]
impl ObjectStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn put(
        &self,
        _key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        *self.attempts.lock().unwrap() += 1;
        Err(StorageError::Backend("bucket unavailable".into()))
    }
}

pub fn local_uploader(dir: &tempfile::TempDir) -> ArtifactUploader {
    ArtifactUploader::new(
        Arc::new(LocalStore::new(dir.path().to_path_buf())),
        AudioTranscoder::default(),
    )
}

pub fn failing_uploader(store: Arc<FailingStore>) -> ArtifactUploader {
    ArtifactUploader::new(store, AudioTranscoder::default())
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// A succeeded image envelope holding `artifacts` pending PNG images.
pub fn image_envelope(id: &str, webhook_url: &str, artifacts: usize) -> ResultEnvelope {
    let mut env = ImageResultEnvelope::new(&JobRouting {
        id: id.into(),
        webhook_url: webhook_url.into(),
        upload_prefix: format!("results/{id}"),
    });
    env.upload_output = (0..artifacts)
        .map(|i| ImageArtifact {
            image: DynamicImage::new_rgb8(4, 4),
            target: ImageEncoding {
                extension: ImageExtension::Png,
                quality: 90,
            },
            image_embed: Some(vec![i as f32]),
        })
        .collect();
    env.prompt_embed = Some(vec![0.5]);
    env.header.mark_succeeded();
    env.into()
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Deterministic stand-in for every model family. Never flags NSFW.
pub struct StubModels;

#[async_trait]
impl Translator for StubModels {
    async fn translate(&self, text: &str, _lang_hint: Option<&str>) -> Result<String, ModelError> {
        Ok(text.to_string())
    }
}

#[async_trait]
impl ImageGenerator for StubModels {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ModelError> {
        Ok(Generation {
            images: (0..request.num_outputs)
                .map(|_| DynamicImage::new_rgb8(8, 8))
                .collect(),
            nsfw_flags: None,
        })
    }
}

#[async_trait]
impl Upscaler for StubModels {
    async fn upscale(&self, _input: UpscaleInput) -> Result<DynamicImage, ModelError> {
        Ok(DynamicImage::new_rgb8(16, 16))
    }
}

#[async_trait]
impl Embedder for StubModels {
    async fn embed_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>, ModelError> {
        Ok(images.iter().map(|_| vec![0.25, 0.75]).collect())
    }

    async fn embed_text(&self, _text: &str) -> Result<Embedding, ModelError> {
        Ok(vec![1.0, 0.0])
    }
}

#[async_trait]
impl VoiceSynthesizer for StubModels {
    async fn synthesize(&self, _request: &VoiceRequest) -> Result<Vec<AudioSegment>, ModelError> {
        Ok(vec![AudioSegment {
            wav_bytes: b"RIFF0000WAVE".to_vec(),
            audio_duration: 1.0,
            sample_rate: 24_000,
        }])
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a raw JSON body through the router.
pub async fn post_json(app: Router, uri: &str, body: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
