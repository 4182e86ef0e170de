//! Blob store client
//!
//! Content-addressed object storage with attached metadata. The
//! production backend is S3-compatible; originals and variants share the
//! logical bucket `photos` and are distinguished only by the size index
//! references, never by key naming.

use crate::config::S3Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::path::Path;
use uuid::Uuid;

/// Metadata attached to a stored blob
#[derive(Clone, Debug, Default)]
pub struct BlobMetadata {
    pub content_type: String,
    pub business_id: Option<String>,
    pub caption: Option<String>,
}

/// Content-addressed binary object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream a local file into storage and return the assigned id
    async fn put(&self, source: &Path, filename: &str, metadata: BlobMetadata) -> Result<String>;

    /// Fetch a blob fully into memory along with its metadata.
    ///
    /// Returns [`AppError::BlobNotFound`] if `id` does not reference an
    /// existing object.
    async fn get(&self, id: &str) -> Result<(Bytes, BlobMetadata)>;

    /// Metadata lookup without downloading the body
    async fn find(&self, id: &str) -> Result<Option<BlobMetadata>>;
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Initialize the S3 client with credentials from config.
    ///
    /// Falls back to the default credential chain when no explicit keys
    /// are provided; a custom endpoint supports S3-compatible storage
    /// like MinIO.
    pub async fn from_config(config: &S3Config) -> Result<Self> {
        use aws_sdk_s3::config::Region;

        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            use aws_sdk_s3::config::Credentials;

            let credentials = Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "photo_service_s3",
            );
            aws_config_builder = aws_config_builder.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        tracing::info!(bucket = %config.bucket, "Blob store client initialized");

        Ok(Self {
            client: Client::new(&aws_config),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, source: &Path, filename: &str, metadata: BlobMetadata) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to open blob source: {e}")))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&id)
            .body(body)
            .content_type(&metadata.content_type)
            .metadata("filename", filename);

        if let Some(business_id) = &metadata.business_id {
            request = request.metadata("business-id", business_id);
        }
        if let Some(caption) = &metadata.caption {
            request = request.metadata("caption", caption);
        }

        request
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to upload blob: {e}")))?;

        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<(Bytes, BlobMetadata)> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("NoSuchKey") || message.contains("404") {
                    AppError::BlobNotFound(id.to_string())
                } else {
                    AppError::Internal(format!("Failed to download blob: {e}"))
                }
            })?;

        let metadata = blob_metadata_from_response(
            response.content_type().map(str::to_string),
            response.metadata().cloned(),
        );

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read blob body: {e}")))?
            .into_bytes();

        Ok((bytes, metadata))
    }

    async fn find(&self, id: &str) -> Result<Option<BlobMetadata>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
        {
            Ok(response) => Ok(Some(blob_metadata_from_response(
                response.content_type().map(str::to_string),
                response.metadata().cloned(),
            ))),
            Err(e) => {
                let message = e.to_string();
                if message.contains("NotFound") || message.contains("404") {
                    Ok(None)
                } else {
                    Err(AppError::Internal(format!(
                        "Failed to look up blob metadata: {e}"
                    )))
                }
            }
        }
    }
}

fn blob_metadata_from_response(
    content_type: Option<String>,
    object_metadata: Option<std::collections::HashMap<String, String>>,
) -> BlobMetadata {
    let object_metadata = object_metadata.unwrap_or_default();
    BlobMetadata {
        content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        business_id: object_metadata.get("business-id").cloned(),
        caption: object_metadata.get("caption").cloned(),
    }
}
