//! Glacier vault backend for the cold tier.
//!
//! Uploads stream the staged file from disk (`ByteStream::from_path`), pass
//! the precomputed tree hash as the archive checksum and verify the checksum
//! echoed back by the service.

use async_trait::async_trait;
use aws_sdk_glacier::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{TierError, TierResult};
use crate::scratch::StagedArchive;
use crate::sdk::{is_not_found_error, load_sdk_config, AwsCredentials, ClientSettings};
use crate::vault::{ArchiveId, ArchiveVault};

/// Configuration for a Glacier vault.
#[derive(Debug, Clone)]
pub struct GlacierConfig {
    /// Vault name (required).
    pub vault: String,

    /// Owning account id. `-` means the credentials' own account.
    pub account_id: String,

    /// AWS region.
    pub region: Option<String>,

    /// Custom endpoint URL.
    pub endpoint_url: Option<String>,

    /// Overall per-operation timeout in seconds. Default: none.
    pub timeout_secs: Option<u64>,

    /// Maximum retry attempts after the first try.
    pub max_retries: u32,

    /// Static credentials. Falls back to the default chain when absent.
    pub credentials: Option<AwsCredentials>,
}

impl Default for GlacierConfig {
    fn default() -> Self {
        Self {
            vault: String::new(),
            account_id: "-".to_string(),
            region: None,
            endpoint_url: None,
            timeout_secs: None,
            max_retries: 0,
            credentials: None,
        }
    }
}

impl GlacierConfig {
    /// Creates a configuration for `vault`.
    #[must_use]
    pub fn new(vault: impl Into<String>) -> Self {
        Self {
            vault: vault.into(),
            ..Self::default()
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets a custom endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }

    /// Sets the overall operation timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets static credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Glacier-backed [`ArchiveVault`].
#[derive(Clone)]
pub struct GlacierVault {
    client: aws_sdk_glacier::Client,
    config: GlacierConfig,
}

impl GlacierVault {
    /// Creates a vault client.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::Config`] if the vault name is empty.
    pub async fn new(config: GlacierConfig) -> TierResult<Self> {
        if config.vault.is_empty() {
            return Err(TierError::Config {
                message: "vault name must not be empty".to_string(),
            });
        }

        let sdk_config = load_sdk_config(ClientSettings {
            region: config.region.as_deref(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            credentials: config.credentials.as_ref(),
        })
        .await;

        let mut builder = aws_sdk_glacier::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let client = aws_sdk_glacier::Client::from_conf(builder.build());
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ArchiveVault for GlacierVault {
    fn name(&self) -> &str {
        &self.config.vault
    }

    async fn ensure_vault(&self) -> TierResult<()> {
        let described = self
            .client
            .describe_vault()
            .account_id(&self.config.account_id)
            .vault_name(&self.config.vault)
            .send()
            .await;

        match described {
            Ok(_) => Ok(()),
            Err(e) if is_not_found_error(&e) => {
                info!(vault = %self.config.vault, "Creating vault");
                self.client
                    .create_vault()
                    .account_id(&self.config.account_id)
                    .vault_name(&self.config.vault)
                    .send()
                    .await
                    .map_err(|e| TierError::Io {
                        operation: "ensure_vault",
                        message: format!("Glacier CreateVault failed: {e}"),
                    })?;
                Ok(())
            }
            Err(e) => Err(TierError::Io {
                operation: "ensure_vault",
                message: format!("Glacier DescribeVault failed: {e}"),
            }),
        }
    }

    async fn upload_archive(
        &self,
        archive: &StagedArchive,
        description: &str,
    ) -> TierResult<ArchiveId> {
        let digest = archive.digest();
        let body = ByteStream::from_path(archive.path())
            .await
            .map_err(|e| TierError::UploadFailed {
                key: description.to_string(),
                message: format!("failed to open staged archive: {e}"),
            })?;

        debug!(
            vault = %self.config.vault,
            bytes = digest.len,
            tree_hash = %digest.tree_hash,
            sha256 = %digest.linear_sha256,
            "Uploading archive"
        );

        let output = self
            .client
            .upload_archive()
            .account_id(&self.config.account_id)
            .vault_name(&self.config.vault)
            .archive_description(description)
            .checksum(&digest.tree_hash)
            .body(body)
            .send()
            .await
            .map_err(|e| TierError::UploadFailed {
                key: description.to_string(),
                message: format!("Glacier UploadArchive failed: {e}"),
            })?;

        if let Some(echoed) = output.checksum() {
            if echoed != digest.tree_hash {
                return Err(TierError::Integrity {
                    key: description.to_string(),
                    expected: digest.tree_hash.clone(),
                    actual: echoed.to_string(),
                });
            }
        }

        output
            .archive_id()
            .map(ArchiveId::new)
            .ok_or_else(|| TierError::UploadFailed {
                key: description.to_string(),
                message: "Glacier UploadArchive returned no archive id".to_string(),
            })
    }

    async fn delete_archive(&self, id: &ArchiveId) -> TierResult<()> {
        self.client
            .delete_archive()
            .account_id(&self.config.account_id)
            .vault_name(&self.config.vault)
            .archive_id(id.as_str())
            .send()
            .await
            .map_err(|e| {
                if is_not_found_error(&e) {
                    TierError::NotFound {
                        key: id.to_string(),
                    }
                } else {
                    TierError::Io {
                        operation: "delete_archive",
                        message: format!("Glacier DeleteArchive failed: {e}"),
                    }
                }
            })?;
        Ok(())
    }
}
