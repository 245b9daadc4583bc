use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use genrelay_cloud::encode::DEFAULT_FFMPEG_PATH;
use genrelay_cloud::StorageConfig;
use genrelay_core::config::{env_or, env_parse};
use genrelay_core::CoreError;
use genrelay_events::WebhookConfig;
use genrelay_pipeline::{DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY};

use crate::upload_worker::DEFAULT_POLL_TIMEOUT;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// `json` (case-insensitive) selects JSON; anything else is text.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }

    /// Read `LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::parse(&env_or("LOG_FORMAT", "text"))
    }
}

/// Worker configuration loaded from environment variables.
///
/// Read once in `main` and passed down by value.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Intake bind address (default: `0.0.0.0`).
    pub host: String,
    /// Intake bind port (default: `8080`).
    pub port: u16,
    /// Base URL of the model server.
    pub model_server_url: String,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
    /// Envelopes buffered between orchestration and the upload worker.
    pub queue_capacity: usize,
    /// How long the upload worker waits on an empty queue before checking
    /// for shutdown.
    pub poll_timeout: Duration,
    pub ffmpeg_path: String,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `0.0.0.0`               |
    /// | `PORT`                    | `8080`                  |
    /// | `MODEL_SERVER_URL`        | `http://localhost:5000` |
    /// | `DELIVERY_QUEUE_CAPACITY` | `64`                    |
    /// | `UPLOAD_POLL_TIMEOUT_MS`  | `1000`                  |
    /// | `FFMPEG_PATH`             | `ffmpeg`                |
    /// | `LOG_FORMAT`              | `text`                  |
    ///
    /// Webhook and storage settings are documented on
    /// [`WebhookConfig::from_env`] and [`StorageConfig::from_env`].
    pub fn from_env() -> Result<Self, CoreError> {
        let config = Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080)?,
            model_server_url: env_or("MODEL_SERVER_URL", "http://localhost:5000"),
            webhook: WebhookConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            queue_capacity: env_parse("DELIVERY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            poll_timeout: Duration::from_millis(env_parse(
                "UPLOAD_POLL_TIMEOUT_MS",
                DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            )?),
            ffmpeg_path: env_or("FFMPEG_PATH", DEFAULT_FFMPEG_PATH),
            log_format: LogFormat::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the pipeline.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=MAX_QUEUE_CAPACITY).contains(&self.queue_capacity) {
            return Err(CoreError::Validation(format!(
                "DELIVERY_QUEUE_CAPACITY must be between 1 and {MAX_QUEUE_CAPACITY}"
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(CoreError::Validation(
                "UPLOAD_POLL_TIMEOUT_MS must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Socket address the intake server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, CoreError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| CoreError::Config(format!("HOST '{}' is not an IP address", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
