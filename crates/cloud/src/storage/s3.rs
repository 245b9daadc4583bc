//! Amazon S3 (and S3-compatible) backend.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use super::{validate_key, ObjectStore, StorageError};

/// Uploads artifacts to a single bucket.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl S3Store {
    /// Build a client from the standard AWS environment/profile chain.
    ///
    /// `endpoint_url` targets an S3-compatible service and switches to
    /// path-style addressing.
    pub async fn connect(
        bucket: String,
        endpoint_url: Option<String>,
        public_base_url: Option<String>,
    ) -> Self {
        let sdk_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(bucket = %bucket, "S3 storage backend configured");

        Self::with_client(aws_sdk_s3::Client::from_conf(builder.build()), bucket, public_base_url)
    }

    pub fn with_client(
        client: aws_sdk_s3::Client,
        bucket: String,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// The reference handed back to callers for `key`.
    fn reference_for(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("s3://{}/{key}", self.bucket),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(aws_sdk_s3::error::DisplayErrorContext(e).to_string())
            })?;

        Ok(self.reference_for(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }

    #[test]
    fn reference_defaults_to_s3_uri() {
        let store = S3Store::with_client(offline_client(), "media".into(), None);
        assert_eq!(store.reference_for("jobs/1/0.png"), "s3://media/jobs/1/0.png");
    }

    #[test]
    fn reference_uses_public_base_url() {
        let store = S3Store::with_client(
            offline_client(),
            "media".into(),
            Some("https://cdn.example.com/".into()),
        );
        assert_eq!(
            store.reference_for("jobs/1/0.png"),
            "https://cdn.example.com/jobs/1/0.png"
        );
    }
}
