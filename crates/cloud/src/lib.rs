//! Blob storage and artifact upload.
//!
//! - [`storage`]: the [`ObjectStore`](storage::ObjectStore) trait with S3
//!   and local-filesystem backends.
//! - [`encode`]: image encoding and WAV-to-MP3 transcoding.
//! - [`uploader`]: [`ArtifactUploader`], which turns an envelope's pending
//!   artifacts into storage references.

pub mod encode;
pub mod storage;
pub mod uploader;

pub use storage::{build_store, ObjectStore, StorageConfig, StorageError};
pub use uploader::{ArtifactUploader, UploadError};
