//! S3-compatible blob store (AWS S3, MinIO, GCS through its interoperability API).

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::debug;

use crate::config::S3Settings;
use crate::errors::StorageError;
use crate::storage::BlobStore;

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::backend(
                "head",
                key,
                aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
            )),
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        let len = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::backend(
                    "put",
                    key,
                    aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
                )
            })?;
        debug!("Uploaded {len} bytes to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(StorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => {
                return Err(StorageError::backend(
                    "get",
                    key,
                    aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
                ))
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::backend("get", key, e.to_string()))?;
        Ok(data.into_bytes())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Constructs an S3 client for MinIO / GCS interop (custom endpoint) or AWS.
pub async fn build_s3_client(settings: &S3Settings) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()));
    if let Some((access_key_id, secret_access_key)) = &settings.credentials {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "battlecard-static",
        ));
    }
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    // MinIO and most custom endpoints only serve path-style bucket URLs.
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(settings.endpoint.is_some())
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
