//! Webhook delivery with linear-backoff retry.
//!
//! [`WebhookDelivery`] sends a JSON-encoded result payload to a caller URL
//! via HTTP POST. A response in [`TERMINAL_STATUS_CODES`] ends delivery
//! immediately; any other response (or a transport error) is retried up to
//! [`WebhookConfig::max_retries`] more times, sleeping `backoff_step * k`
//! before retry `k` (0, 150 ms, 300 ms with the defaults).

use std::time::Duration;

use genrelay_core::config::{env_opt, env_parse, parse_flag};
use genrelay_core::CoreError;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use crate::delivery::signing::{compute_body_hmac, HMAC_SIGNATURE_HEADER, SIGNATURE_HEADER};

/// Status codes that end delivery without retry.
///
/// 400 and 401 are caller-side errors, yet they are terminal alongside 200
/// because existing receivers depend on it. This conflates "delivered" with
/// "rejected" and is a likely policy bug kept for compatibility.
pub const TERMINAL_STATUS_CODES: [u16; 3] = [200, 400, 401];

/// Default number of additional attempts after the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default linear backoff step.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(150);

/// Default HTTP timeout for a single delivery attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Immutable webhook settings, read once at process start.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Process-wide signing secret. Empty when unset.
    pub secret: String,
    /// Also send an HMAC-SHA256 of the body in `signature-sha256`.
    pub hmac: bool,
    pub max_retries: u32,
    pub backoff_step: Duration,
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            hmac: false,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step: DEFAULT_BACKOFF_STEP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default |
    /// |------------------------|---------|
    /// | `WEBHOOK_SIGNATURE`    | empty   |
    /// | `WEBHOOK_HMAC`         | `false` |
    /// | `WEBHOOK_MAX_RETRIES`  | `3`     |
    /// | `WEBHOOK_BACKOFF_MS`   | `150`   |
    /// | `WEBHOOK_TIMEOUT_SECS` | `10`    |
    pub fn from_env() -> Result<Self, CoreError> {
        let secret = std::env::var("WEBHOOK_SIGNATURE").unwrap_or_default();
        if secret.is_empty() {
            tracing::warn!("WEBHOOK_SIGNATURE is not set, webhooks will carry an empty signature");
        }

        Ok(Self {
            secret,
            hmac: env_opt("WEBHOOK_HMAC").is_some_and(|v| parse_flag(&v)),
            max_retries: env_parse("WEBHOOK_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            backoff_step: Duration::from_millis(env_parse(
                "WEBHOOK_BACKOFF_MS",
                DEFAULT_BACKOFF_STEP.as_millis() as u64,
            )?),
            request_timeout: Duration::from_secs(env_parse(
                "WEBHOOK_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
        })
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
///
/// A non-terminal status code is not an error: it is returned as the final
/// status once retries run out.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The payload could not be encoded as JSON.
    #[error("Failed to encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The configured secret cannot be sent as an HTTP header value.
    #[error("Webhook secret is not a valid header value")]
    InvalidSecret,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Whether `status` ends delivery without retry.
pub fn is_terminal_status(status: u16) -> bool {
    TERMINAL_STATUS_CODES.contains(&status)
}

/// Sleep before retry number `retry` (0-based): `step * retry`.
pub fn backoff_delay(step: Duration, retry: u32) -> Duration {
    step * retry
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers job results to caller webhook endpoints.
#[derive(Debug)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    config: WebhookConfig,
    signature: HeaderValue,
}

impl WebhookDelivery {
    /// Create a delivery service with a pre-configured HTTP client.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(client, config)
    }

    /// Create a delivery service reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: WebhookConfig) -> Result<Self, WebhookError> {
        let mut signature =
            HeaderValue::from_str(&config.secret).map_err(|_| WebhookError::InvalidSecret)?;
        signature.set_sensitive(true);
        Ok(Self {
            client,
            config,
            signature,
        })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Deliver `payload` to `url`, retrying non-terminal outcomes.
    ///
    /// Returns the last status code any attempt received, even when later
    /// attempts failed at the transport level. Only returns `Err` when the
    /// payload cannot be encoded or no attempt received a response.
    pub async fn deliver<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<u16, WebhookError> {
        let body = serde_json::to_vec(payload)?;
        let mut retries = 0u32;
        let mut last_status: Option<u16> = None;

        loop {
            tracing::debug!(url, attempt = retries + 1, "Posting webhook");
            let outcome = self.try_send(url, &body).await;
            if let Ok(status) = outcome {
                last_status = Some(status);
            }

            let retryable = match &outcome {
                Ok(status) => !is_terminal_status(*status),
                Err(_) => true,
            };
            if !retryable || retries >= self.config.max_retries {
                let attempts = retries + 1;
                return match (outcome, last_status) {
                    (Ok(status), _) if is_terminal_status(status) => {
                        tracing::info!(url, status, attempts, "Webhook delivered");
                        Ok(status)
                    }
                    (Ok(status), _) => {
                        tracing::error!(
                            url,
                            status,
                            attempts,
                            "Webhook delivery failed after all retries"
                        );
                        Ok(status)
                    }
                    (Err(e), Some(status)) => {
                        tracing::error!(
                            url,
                            status,
                            error = %e,
                            attempts,
                            "Webhook delivery failed after all retries"
                        );
                        Ok(status)
                    }
                    (Err(e), None) => {
                        tracing::error!(url, error = %e, attempts, "Webhook delivery failed after all retries");
                        Err(e)
                    }
                };
            }

            let delay = backoff_delay(self.config.backoff_step, retries);
            match &outcome {
                Ok(status) => tracing::warn!(
                    url,
                    status,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Webhook returned a retryable status, retrying"
                ),
                Err(e) => tracing::warn!(
                    url,
                    error = %e,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Webhook attempt failed, retrying"
                ),
            }
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    /// Execute a single POST and report the response status.
    async fn try_send(&self, url: &str, body: &[u8]) -> Result<u16, WebhookError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, self.signature.clone());

        if self.config.hmac {
            request = request.header(
                HMAC_SIGNATURE_HEADER,
                compute_body_hmac(&self.config.secret, body),
            );
        }

        let response = request.body(body.to_vec()).send().await?;
        Ok(response.status().as_u16())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use assert_matches::assert_matches;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;

    use super::*;

    /// One request observed by the mock receiver.
    struct Hit {
        at: Instant,
        headers: HeaderMap,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct MockState {
        statuses: Arc<Mutex<VecDeque<u16>>>,
        hits: Arc<Mutex<Vec<Hit>>>,
    }

    /// Spawn a receiver that answers with `statuses` in order, repeating
    /// the last one once the script runs out.
    async fn spawn_receiver(statuses: &[u16]) -> (String, Arc<Mutex<Vec<Hit>>>) {
        let state = MockState {
            statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
            hits: Arc::new(Mutex::new(Vec::new())),
        };
        let hits = Arc::clone(&state.hits);

        let app = Router::new()
            .route("/hook", post(hook))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/hook"), hits)
    }

    async fn hook(
        State(state): State<MockState>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        state.hits.lock().unwrap().push(Hit {
            at: Instant::now(),
            headers,
            body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        });
        let mut statuses = state.statuses.lock().unwrap();
        let code = if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            *statuses.front().unwrap()
        };
        StatusCode::from_u16(code).unwrap()
    }

    fn config(step_ms: u64) -> WebhookConfig {
        WebhookConfig {
            secret: "s3cret".into(),
            backoff_step: Duration::from_millis(step_ms),
            ..Default::default()
        }
    }

    #[test]
    fn terminal_codes() {
        assert!(is_terminal_status(200));
        assert!(is_terminal_status(400));
        assert!(is_terminal_status(401));
        assert!(!is_terminal_status(201));
        assert!(!is_terminal_status(404));
        assert!(!is_terminal_status(500));
    }

    #[test]
    fn backoff_is_linear() {
        let step = Duration::from_millis(150);
        let delays: Vec<u64> = (0..3)
            .map(|k| backoff_delay(step, k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 150, 300]);
    }

    #[test]
    fn webhook_error_display_invalid_secret() {
        assert_eq!(
            WebhookError::InvalidSecret.to_string(),
            "Webhook secret is not a valid header value"
        );
    }

    #[test]
    fn secret_with_newline_is_rejected() {
        let cfg = WebhookConfig {
            secret: "bad\nsecret".into(),
            ..Default::default()
        };
        assert_matches!(WebhookDelivery::new(cfg), Err(WebhookError::InvalidSecret));
    }

    #[tokio::test]
    async fn terminal_codes_are_sent_once() {
        for code in TERMINAL_STATUS_CODES {
            let (url, hits) = spawn_receiver(&[code]).await;
            let delivery = WebhookDelivery::new(config(10)).unwrap();

            let status = delivery
                .deliver(&url, &serde_json::json!({"status": "succeeded"}))
                .await
                .unwrap();

            assert_eq!(status, code);
            assert_eq!(hits.lock().unwrap().len(), 1, "code {code} must not retry");
        }
    }

    #[tokio::test]
    async fn persistent_failure_retries_with_linear_backoff() {
        let (url, hits) = spawn_receiver(&[503]).await;
        let delivery = WebhookDelivery::new(config(150)).unwrap();

        let status = delivery
            .deliver(&url, &serde_json::json!({"id": "job-1"}))
            .await
            .unwrap();

        assert_eq!(status, 503);
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 1 + DEFAULT_MAX_RETRIES as usize);

        let gaps: Vec<Duration> = hits.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert!(gaps[0] < Duration::from_millis(140), "first retry is immediate: {gaps:?}");
        assert!(gaps[1] >= Duration::from_millis(150), "second gap: {gaps:?}");
        assert!(gaps[1] < Duration::from_millis(290), "second gap: {gaps:?}");
        assert!(gaps[2] >= Duration::from_millis(300), "third gap: {gaps:?}");
    }

    #[tokio::test]
    async fn returns_last_status_after_recovery() {
        let (url, hits) = spawn_receiver(&[500, 502, 200]).await;
        let delivery = WebhookDelivery::new(config(5)).unwrap();

        let status = delivery.deliver(&url, &serde_json::json!({})).await.unwrap();

        assert_eq!(status, 200);
        assert_eq!(hits.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sends_signature_and_json_body() {
        let (url, hits) = spawn_receiver(&[200]).await;
        let delivery = WebhookDelivery::new(config(5)).unwrap();

        delivery
            .deliver(&url, &serde_json::json!({"id": "abc", "status": "failed"}))
            .await
            .unwrap();

        let hits = hits.lock().unwrap();
        assert_eq!(hits[0].headers[SIGNATURE_HEADER], "s3cret");
        assert!(hits[0].headers.get(HMAC_SIGNATURE_HEADER).is_none());
        assert_eq!(hits[0].body["id"], "abc");
        assert_eq!(hits[0].body["status"], "failed");
    }

    #[tokio::test]
    async fn empty_secret_sends_empty_signature() {
        let (url, hits) = spawn_receiver(&[200]).await;
        let delivery = WebhookDelivery::new(WebhookConfig::default()).unwrap();

        delivery.deliver(&url, &serde_json::json!({})).await.unwrap();

        assert_eq!(hits.lock().unwrap()[0].headers[SIGNATURE_HEADER], "");
    }

    #[tokio::test]
    async fn hmac_header_matches_body() {
        let (url, hits) = spawn_receiver(&[200]).await;
        let delivery = WebhookDelivery::new(WebhookConfig {
            hmac: true,
            ..config(5)
        })
        .unwrap();
        let payload = serde_json::json!({"id": "job-9"});

        delivery.deliver(&url, &payload).await.unwrap();

        let expected = compute_body_hmac("s3cret", &serde_json::to_vec(&payload).unwrap());
        assert_eq!(
            hits.lock().unwrap()[0].headers[HMAC_SIGNATURE_HEADER],
            expected.as_str()
        );
    }

    /// Answer `count` connections with a bare 503, then stop listening.
    async fn spawn_flaky_receiver(count: usize) -> (String, Arc<Mutex<usize>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for _ in 0..count {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request_complete(&request) {
                        break;
                    }
                }
                *counter.lock().unwrap() += 1;
                socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await
                    .unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{addr}/hook"), hits)
    }

    /// Headers received and `content-length` bytes of body after them.
    fn request_complete(raw: &[u8]) -> bool {
        let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= end + 4 + length
    }

    #[tokio::test]
    async fn transport_failure_after_a_response_returns_last_status() {
        let (url, hits) = spawn_flaky_receiver(DEFAULT_MAX_RETRIES as usize).await;
        let delivery = WebhookDelivery::new(config(20)).unwrap();

        let result = delivery.deliver(&url, &serde_json::json!({"id": "job-2"})).await;

        assert_matches!(result, Ok(503));
        assert_eq!(*hits.lock().unwrap(), DEFAULT_MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn unreachable_endpoint_returns_request_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let delivery = WebhookDelivery::new(config(1)).unwrap();
        let result = delivery
            .deliver(&format!("http://{addr}/hook"), &serde_json::json!({}))
            .await;

        assert_matches!(result, Err(WebhookError::Request(_)));
    }
}
