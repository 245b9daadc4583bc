//! Storage backends for result artifacts.
//!
//! [`ObjectStore`] is the single seam between the upload worker and blob
//! storage. Two backends exist:
//!
//! - [`S3Store`]: Amazon S3 or any S3-compatible endpoint.
//! - [`LocalStore`]: a directory on the local filesystem (development,
//!   tests, or a shared volume).

mod local;
mod s3;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use genrelay_core::config::{env_opt, env_or};
use genrelay_core::CoreError;

pub use local::LocalStore;
pub use s3::S3Store;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A write-only blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Store `bytes` under `key` and return a durable reference to it
    /// (a URL or a backend-specific key).
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, StorageError>;
}

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key would escape the backend's namespace or is empty.
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote backend rejected or failed the request.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Reject keys that are empty, absolute, or contain `..` segments.
///
/// Empty segments (`a//b`) are legal object keys; only backends that map
/// keys onto paths reject them.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Which backend to build and its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        /// S3-compatible endpoint (MinIO, R2, ...). Enables path-style addressing.
        endpoint_url: Option<String>,
        /// When set, references are `<public_base_url>/<key>` instead of
        /// `s3://<bucket>/<key>`.
        public_base_url: Option<String>,
    },
}

impl StorageConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var               | Default     |
    /// |-----------------------|-------------|
    /// | `STORAGE_BACKEND`     | `local`     |
    /// | `STORAGE_LOCAL_PATH`  | `./uploads` |
    /// | `S3_BUCKET`           | required for `s3` |
    /// | `S3_ENDPOINT_URL`     | --          |
    /// | `S3_PUBLIC_BASE_URL`  | --          |
    ///
    /// Credentials and region for S3 come from the standard AWS
    /// environment/profile chain.
    pub fn from_env() -> Result<Self, CoreError> {
        match env_or("STORAGE_BACKEND", "local").as_str() {
            "local" => Ok(Self::Local {
                root: PathBuf::from(env_or("STORAGE_LOCAL_PATH", "./uploads")),
            }),
            "s3" => {
                let bucket = env_opt("S3_BUCKET").ok_or_else(|| {
                    CoreError::Config("S3_BUCKET is required when STORAGE_BACKEND=s3".into())
                })?;
                Ok(Self::S3 {
                    bucket,
                    endpoint_url: env_opt("S3_ENDPOINT_URL"),
                    public_base_url: env_opt("S3_PUBLIC_BASE_URL"),
                })
            }
            other => Err(CoreError::Config(format!(
                "Unknown STORAGE_BACKEND '{other}'. Must be one of: local, s3"
            ))),
        }
    }
}

/// Build the configured backend.
pub async fn build_store(config: &StorageConfig) -> Arc<dyn ObjectStore> {
    match config {
        StorageConfig::Local { root } => Arc::new(LocalStore::new(root.clone())),
        StorageConfig::S3 {
            bucket,
            endpoint_url,
            public_base_url,
        } => Arc::new(
            S3Store::connect(bucket.clone(), endpoint_url.clone(), public_base_url.clone()).await,
        ),
    }
}
