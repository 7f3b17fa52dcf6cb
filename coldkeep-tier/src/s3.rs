//! Hot tier on S3 or an S3-compatible endpoint (`MinIO`, `LocalStack`).
//!
//! Capture streams have no known length, so [`ObjectStorage::put_stream`]
//! reads the body one multipart part at a time and memory stays bounded by
//! [`MULTIPART_PART_BYTES`] however large the archive. A body that ends
//! inside the first part is sent as a plain `PutObject`.
//!
//! Object keys already carry the configured prefix; this backend adds none.
//!
//! ```ignore
//! use coldkeep_tier::{S3Config, S3ObjectStorage};
//!
//! let hot = S3ObjectStorage::new(S3Config::new("backups").with_region("eu-west-1")).await?;
//! ```

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier, StorageClass,
};
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response as HttpResponse;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use coldkeep_core::limits::{DELETE_BATCH_MAX, MULTIPART_PART_BYTES};
use coldkeep_core::{ObjectKey, StorageObject};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{TierError, TierResult};
use crate::sdk::{is_not_found_error, load_sdk_config, AwsCredentials, ClientSettings};
use crate::storage::{require_key, ByteReader, ObjectStorage};

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Storage class stamped on uploaded backups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum S3StorageClass {
    /// `STANDARD`.
    #[default]
    Standard,
    /// `STANDARD_IA`: cheaper at rest, billed per retrieval.
    StandardIa,
    /// `INTELLIGENT_TIERING`.
    IntelligentTiering,
}

impl S3StorageClass {
    const fn sdk(self) -> StorageClass {
        match self {
            Self::Standard => StorageClass::Standard,
            Self::StandardIa => StorageClass::StandardIa,
            Self::IntelligentTiering => StorageClass::IntelligentTiering,
        }
    }
}

/// Connection settings for [`S3ObjectStorage`].
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    /// Bucket holding the backups. Must be non-empty.
    pub bucket: String,

    /// Region override; the SDK's default resolution applies otherwise.
    pub region: Option<String>,

    /// Endpoint of an S3-compatible service.
    pub endpoint_url: Option<String>,

    /// Path-style addressing, which most S3-compatible services need.
    pub force_path_style: bool,

    /// Whole-operation timeout in seconds. Unlimited when `None`.
    pub timeout_secs: Option<u64>,

    /// Retries after the first attempt, with the SDK's backoff.
    pub max_retries: u32,

    /// Class for uploaded objects.
    pub storage_class: S3StorageClass,

    /// Static keys; the default credential chain is used when absent.
    pub credentials: Option<AwsCredentials>,
}

/// Rejected S3 configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum S3ConfigError {
    /// A setting has an unusable value.
    #[error("invalid S3 configuration: {0}")]
    Invalid(String),
}

impl S3Config {
    /// Settings for `bucket` with everything else defaulted.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Targets an S3-compatible endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }

    /// Switches to path-style addressing.
    #[must_use]
    pub const fn with_path_style(mut self) -> Self {
        self.force_path_style = true;
        self
    }

    /// Pins the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Bounds each operation to `secs` seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Uploads with `class`.
    #[must_use]
    pub const fn with_storage_class(mut self, class: S3StorageClass) -> Self {
        self.storage_class = class;
        self
    }

    /// Authenticates with static keys.
    #[must_use]
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

// -----------------------------------------------------------------------------
// S3ObjectStorage
// -----------------------------------------------------------------------------

fn sdk_failure(operation: &'static str, call: &str, e: impl Display) -> TierError {
    TierError::Io {
        operation,
        message: format!("S3 {call}: {e}"),
    }
}

fn upload_failure(key: &ObjectKey, call: &str, e: impl Display) -> TierError {
    TierError::UploadFailed {
        key: key.to_string(),
        message: format!("S3 {call}: {e}"),
    }
}

fn download_failure<E>(key: &ObjectKey, e: &SdkError<E, HttpResponse>) -> TierError
where
    E: std::error::Error + 'static,
{
    if is_not_found_error(e) {
        return TierError::NotFound {
            key: key.to_string(),
        };
    }
    TierError::DownloadFailed {
        key: key.to_string(),
        message: format!("S3 GetObject: {e}"),
    }
}

/// [`ObjectStorage`] backed by one S3 bucket.
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: aws_sdk_s3::Client,
    config: S3Config,
}

impl S3ObjectStorage {
    /// Builds a client for `config`.
    ///
    /// # Errors
    ///
    /// [`S3ConfigError::Invalid`] when the bucket name is empty.
    pub async fn new(config: S3Config) -> Result<Self, S3ConfigError> {
        if config.bucket.is_empty() {
            return Err(S3ConfigError::Invalid("bucket name is empty".to_string()));
        }

        let shared = load_sdk_config(ClientSettings {
            region: config.region.as_deref(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            credentials: config.credentials.as_ref(),
        })
        .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(config.force_path_style);

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            config,
        })
    }

    /// Wraps a client the caller already configured.
    ///
    /// # Panics
    ///
    /// Panics if the bucket name is empty.
    #[must_use]
    pub fn from_client(client: aws_sdk_s3::Client, config: S3Config) -> Self {
        assert!(!config.bucket.is_empty(), "S3 bucket name is empty");
        Self { client, config }
    }

    /// The target bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn put_whole(&self, key: &ObjectKey, data: Vec<u8>) -> TierResult<()> {
        self.client
            .put_object()
            .bucket(self.bucket())
            .key(key.as_str())
            .storage_class(self.config.storage_class.sdk())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| upload_failure(key, "PutObject", e))?;
        Ok(())
    }

    async fn start_multipart(&self, key: &ObjectKey) -> TierResult<String> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(self.bucket())
            .key(key.as_str())
            .storage_class(self.config.storage_class.sdk())
            .send()
            .await
            .map_err(|e| upload_failure(key, "CreateMultipartUpload", e))?;
        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| upload_failure(key, "CreateMultipartUpload", "no upload id returned"))
    }

    /// Sends `first`, then the remainder of `body`, as numbered parts and
    /// completes the upload. Returns the total length.
    async fn send_parts(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        first: Vec<u8>,
        body: &mut ByteReader,
    ) -> TierResult<u64> {
        let mut completed = Vec::new();
        let mut total = 0u64;
        let mut next = first;

        for number in 1_i32.. {
            if next.is_empty() {
                break;
            }
            total += next.len() as u64;
            let sent = self
                .client
                .upload_part()
                .bucket(self.bucket())
                .key(key.as_str())
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from(next))
                .send()
                .await
                .map_err(|e| upload_failure(key, &format!("UploadPart {number}"), e))?;
            completed.push(
                CompletedPart::builder()
                    .part_number(number)
                    .set_e_tag(sent.e_tag().map(str::to_string))
                    .build(),
            );
            debug!(key = %key, part = number, total, "Part uploaded");
            next = next_part(key, body).await?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(self.bucket())
            .key(key.as_str())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| upload_failure(key, "CompleteMultipartUpload", e))?;
        Ok(total)
    }

    async fn abandon_multipart(&self, key: &ObjectKey, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(self.bucket())
            .key(key.as_str())
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = aborted {
            warn!(key = %key, upload_id, error = %e, "Multipart upload left incomplete");
        }
    }

    /// Deletes up to [`DELETE_BATCH_MAX`] keys, returning per-key refusals.
    async fn delete_batch(&self, keys: &[ObjectKey]) -> TierResult<HashMap<String, String>> {
        let identifiers = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k.as_str()).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TierError::io("delete_many", e))?;
        let request = Delete::builder()
            .quiet(true)
            .set_objects(Some(identifiers))
            .build()
            .map_err(|e| TierError::io("delete_many", e))?;

        let response = self
            .client
            .delete_objects()
            .bucket(self.bucket())
            .delete(request)
            .send()
            .await
            .map_err(|e| sdk_failure("delete_many", "DeleteObjects", e))?;

        Ok(response
            .errors()
            .iter()
            .filter_map(|refusal| {
                Some((
                    refusal.key()?.to_string(),
                    refusal.message().unwrap_or("no reason given").to_string(),
                ))
            })
            .collect())
    }

    async fn list_page(
        &self,
        prefix: &str,
        token: Option<String>,
        into: &mut Vec<StorageObject>,
    ) -> TierResult<Option<String>> {
        let page = self
            .client
            .list_objects_v2()
            .bucket(self.bucket())
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| sdk_failure("list", "ListObjectsV2", e))?;

        into.extend(page.contents().iter().filter_map(|entry| {
            let key = entry.key()?;
            let size = entry
                .size()
                .and_then(|s| u64::try_from(s).ok())
                .unwrap_or_default();
            let modified = entry
                .last_modified()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                .unwrap_or_default();
            Some(StorageObject::new(key, size, modified))
        }));

        Ok(if page.is_truncated().unwrap_or(false) {
            page.next_continuation_token().map(str::to_string)
        } else {
            None
        })
    }
}

/// Reads the next part from `body`; empty at end of stream.
async fn next_part(key: &ObjectKey, body: &mut ByteReader) -> TierResult<Vec<u8>> {
    let mut part = Vec::with_capacity(MULTIPART_PART_BYTES);
    body.take(MULTIPART_PART_BYTES as u64)
        .read_to_end(&mut part)
        .await
        .map_err(|e| upload_failure(key, "reading capture stream", e))?;
    Ok(part)
}

// -----------------------------------------------------------------------------
// ObjectStorage Implementation
// -----------------------------------------------------------------------------

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn bucket_exists(&self) -> TierResult<bool> {
        let head = self.client.head_bucket().bucket(self.bucket()).send().await;
        match head {
            Ok(_) => Ok(true),
            Err(e) if is_not_found_error(&e) => Ok(false),
            Err(e) => Err(sdk_failure("bucket_exists", "HeadBucket", e)),
        }
    }

    async fn put(&self, key: &ObjectKey, data: Bytes) -> TierResult<()> {
        require_key(key);
        self.put_whole(key, data.to_vec()).await
    }

    async fn put_stream(&self, key: &ObjectKey, mut body: ByteReader) -> TierResult<u64> {
        require_key(key);

        let first = next_part(key, &mut body).await?;
        if first.len() < MULTIPART_PART_BYTES {
            let len = first.len() as u64;
            self.put_whole(key, first).await?;
            return Ok(len);
        }

        let upload_id = self.start_multipart(key).await?;
        let sent = self.send_parts(key, &upload_id, first, &mut body).await;
        if sent.is_err() {
            self.abandon_multipart(key, &upload_id).await;
        }
        sent
    }

    async fn get(&self, key: &ObjectKey) -> TierResult<Bytes> {
        require_key(key);
        let object = self
            .client
            .get_object()
            .bucket(self.bucket())
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| download_failure(key, &e))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| TierError::DownloadFailed {
                key: key.to_string(),
                message: format!("S3 response body: {e}"),
            })?;
        Ok(body.into_bytes())
    }

    async fn get_stream(&self, key: &ObjectKey) -> TierResult<ByteReader> {
        require_key(key);
        let object = self
            .client
            .get_object()
            .bucket(self.bucket())
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| download_failure(key, &e))?;
        Ok(Box::new(object.body.into_async_read()))
    }

    async fn list(&self, prefix: &str) -> TierResult<Vec<StorageObject>> {
        let mut listed = Vec::new();
        let mut token = self.list_page(prefix, None, &mut listed).await?;
        while token.is_some() {
            token = self.list_page(prefix, token, &mut listed).await?;
        }
        Ok(listed)
    }

    async fn delete(&self, key: &ObjectKey) -> TierResult<()> {
        require_key(key);
        // Missing keys delete successfully.
        self.client
            .delete_object()
            .bucket(self.bucket())
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| sdk_failure("delete", "DeleteObject", e))?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[ObjectKey]) -> Vec<(ObjectKey, TierResult<()>)> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for batch in keys.chunks(DELETE_BATCH_MAX) {
            let refused = self.delete_batch(batch).await;
            for key in batch {
                let outcome = match &refused {
                    Ok(refused) => match refused.get(key.as_str()) {
                        Some(reason) => Err(TierError::Io {
                            operation: "delete_many",
                            message: format!("{key}: {reason}"),
                        }),
                        None => Ok(()),
                    },
                    Err(e) => Err(TierError::io("delete_many", e)),
                };
                outcomes.push((key.clone(), outcome));
            }
        }
        outcomes
    }

    async fn exists(&self, key: &ObjectKey) -> TierResult<bool> {
        require_key(key);
        let head = self
            .client
            .head_object()
            .bucket(self.bucket())
            .key(key.as_str())
            .send()
            .await;
        match head {
            Ok(_) => Ok(true),
            Err(e) if is_not_found_error(&e) => Ok(false),
            Err(e) => Err(sdk_failure("exists", "HeadObject", e)),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_no_timeout() {
        let config = S3Config::new("backups");
        assert_eq!(config.bucket, "backups");
        assert!(!config.force_path_style);
        assert!(config.timeout_secs.is_none());
        assert_eq!(config.max_retries, 0);
        assert!(config.credentials.is_none());
        assert_eq!(config.storage_class, S3StorageClass::Standard);
    }

    #[test]
    fn test_builders_set_fields() {
        let config = S3Config::new("backups")
            .with_endpoint("http://localhost:4566")
            .with_path_style()
            .with_region("us-west-2")
            .with_timeout_secs(600)
            .with_storage_class(S3StorageClass::StandardIa)
            .with_credentials(AwsCredentials::new("id", "secret"));

        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert!(config.force_path_style);
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.timeout_secs, Some(600));
        assert_eq!(config.storage_class.sdk(), StorageClass::StandardIa);
        assert_eq!(
            config.credentials.map(|c| c.access_key_id).as_deref(),
            Some("id")
        );
    }

    #[tokio::test]
    async fn test_empty_bucket_is_rejected() {
        let result = S3ObjectStorage::new(S3Config::default()).await;
        assert!(matches!(result, Err(S3ConfigError::Invalid(_))));
    }
}
