//! S3-compatible object store (AWS S3, MinIO, R2, ...).
//!
//! Uploads stream in parts: a payload that fits in one part goes up as a
//! single `PutObject`, anything larger becomes a multipart upload so only
//! one part is ever held in memory. Re-uploading a key replaces it.

use super::{ByteStream, ObjectStore, StoreError, StoreResult, ensure_key_safe};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Builder, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream as S3Body,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Parts are flushed once this many bytes are buffered. S3 requires at
/// least 5 MiB for every part but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 storage backend configuration
#[derive(Clone, Debug)]
pub struct S3Config {
    pub bucket: String,
    /// Optional prefix for all keys (e.g. "archive/")
    pub prefix: Option<String>,
    pub region: String,
    /// Custom endpoint URL (for MinIO, R2, etc.). Forces path-style URLs.
    pub endpoint: Option<String>,
    /// When set, `url_for` returns presigned GETs valid for this long
    /// instead of the stable public URL.
    pub presign_ttl: Option<Duration>,
}

impl S3Config {
    /// Create config for AWS S3
    pub fn aws(bucket: String, region: String) -> Self {
        Self {
            bucket,
            prefix: None,
            region,
            endpoint: None,
            presign_ttl: None,
        }
    }
}

pub struct S3ObjectStore {
    name: String,
    client: Client,
    config: S3Config,
}

impl S3ObjectStore {
    /// Build a client from the ambient AWS credential chain.
    pub async fn new(name: impl Into<String>, config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            name: name.into(),
            client: Client::from_conf(builder.build()),
            config,
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.config.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Permanent URL of `key`. Readable only if the bucket allows it.
    fn public_url(&self, key: &str) -> String {
        let full_key = self.full_key(key);
        match &self.config.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.config.bucket,
                full_key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.config.bucket, self.config.region, full_key
            ),
        }
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> StoreError {
        StoreError::Unavailable {
            backend: self.name.clone(),
            message: err.to_string(),
        }
    }

    fn classify(&self, key: &str, err: impl std::fmt::Display) -> StoreError {
        let err_str = err.to_string();
        if err_str.contains("NoSuchKey") || err_str.contains("NotFound") || err_str.contains("404")
        {
            StoreError::NotFound(key.to_string())
        } else {
            self.unavailable(err_str)
        }
    }

    async fn put_single(&self, s3_key: &str, content_type: &str, data: Bytes) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(s3_key)
            .content_type(content_type)
            .content_length(data.len() as i64)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| self.unavailable(DisplayErrorContext(e)))?;
        Ok(())
    }

    /// Upload `first` plus the rest of `body` as a multipart upload.
    async fn put_multipart(
        &self,
        s3_key: &str,
        content_type: &str,
        first: Bytes,
        body: &mut ByteStream,
    ) -> StoreResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(s3_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| self.unavailable(DisplayErrorContext(e)))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| self.unavailable("multipart upload returned no upload id"))?
            .to_string();

        match self.upload_parts(s3_key, &upload_id, first, body).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(s3_key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| self.unavailable(DisplayErrorContext(e)))?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(s3_key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = s3_key, "failed to abort multipart upload: {}", abort_err);
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        s3_key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ByteStream,
    ) -> StoreResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut pending = Some(first);
        let mut part_number: i32 = 1;

        while let Some(data) = pending.take() {
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.config.bucket)
                .key(s3_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(S3Body::from(data))
                .send()
                .await
                .map_err(|e| self.unavailable(DisplayErrorContext(e)))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;

            let next = fill_part(body).await?;
            if !next.is_empty() {
                pending = Some(next);
            }
        }

        debug!(key = s3_key, parts = parts.len(), "uploaded multipart object");
        Ok(parts)
    }
}

/// Pull chunks from `body` until `PART_SIZE` bytes are buffered or it ends.
async fn fill_part(body: &mut ByteStream) -> StoreResult<Bytes> {
    let mut buf = BytesMut::with_capacity(PART_SIZE);
    while buf.len() < PART_SIZE {
        match body.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(buf.freeze())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, content_type: &str, mut body: ByteStream) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let s3_key = self.full_key(key);

        let first = fill_part(&mut body).await?;
        if first.len() < PART_SIZE {
            self.put_single(&s3_key, content_type, first).await?;
        } else {
            self.put_multipart(&s3_key, content_type, first, &mut body)
                .await?;
        }

        self.url_for(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        ensure_key_safe(key)?;
        let result = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| self.classify(key, DisplayErrorContext(e)))?;

        Ok(ReaderStream::new(result.body.into_async_read()).boxed())
    }

    async fn size(&self, key: &str) -> StoreResult<u64> {
        ensure_key_safe(key)?;
        let result = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| self.classify(key, DisplayErrorContext(e)))?;

        Ok(result.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn url_for(&self, key: &str) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let Some(ttl) = self.config.presign_ttl else {
            return Ok(self.public_url(key));
        };

        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| self.unavailable(e))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.full_key(key))
            .presigned(presigning)
            .await
            .map_err(|e| self.unavailable(DisplayErrorContext(e)))?;
        Ok(request.uri().to_string())
    }

    fn locators_expire(&self) -> bool {
        self.config.presign_ttl.is_some()
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| self.unavailable(DisplayErrorContext(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(endpoint: Option<&str>, prefix: Option<&str>) -> S3ObjectStore {
        let mut config = S3Config::aws("archive".into(), "eu-west-1".into());
        config.endpoint = endpoint.map(str::to_string);
        config.prefix = prefix.map(str::to_string);
        S3ObjectStore::new("durable", config).await
    }

    #[tokio::test]
    async fn public_url_uses_virtual_host_on_aws() {
        let s3 = store(None, Some("tiered/")).await;
        assert_eq!(
            s3.public_url("user-a/f.txt"),
            "https://archive.s3.eu-west-1.amazonaws.com/tiered/user-a/f.txt"
        );
    }

    #[tokio::test]
    async fn public_url_is_path_style_on_custom_endpoint() {
        let s3 = store(Some("http://minio:9000/"), None).await;
        assert_eq!(
            s3.url_for("user-a/f.txt").await.unwrap(),
            "http://minio:9000/archive/user-a/f.txt"
        );
    }

    #[tokio::test]
    async fn missing_object_errors_map_to_not_found() {
        let s3 = store(None, None).await;
        assert!(matches!(
            s3.classify("k", "service error: NoSuchKey"),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            s3.classify("k", "dispatch failure: connection refused"),
            StoreError::Unavailable { .. }
        ));
    }
}
