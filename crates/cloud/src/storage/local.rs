//! Local-filesystem backend.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{validate_key, ObjectStore, StorageError};

/// Writes artifacts below a root directory and returns their file paths.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        if key.split('/').any(str::is_empty) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}
