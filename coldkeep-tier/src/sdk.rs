//! Shared AWS SDK plumbing for the S3 and vault backends.

use std::fmt;
use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response as HttpResponse;

#[cfg(feature = "s3")]
use aws_sdk_s3::config::Credentials;
#[cfg(all(feature = "glacier", not(feature = "s3")))]
use aws_sdk_glacier::config::Credentials;

/// Static access keys, used instead of the default credential chain.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

impl AwsCredentials {
    /// Creates a static credential pair.
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Client settings common to every AWS backend.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientSettings<'a> {
    pub region: Option<&'a str>,
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub credentials: Option<&'a AwsCredentials>,
}

/// Loads an SDK config with the given overrides applied.
///
/// Without static credentials the standard chain is used: environment
/// variables, the shared credentials file, then instance roles.
pub(crate) async fn load_sdk_config(settings: ClientSettings<'_>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = settings.region {
        loader = loader.region(Region::new(region.to_string()));
    }

    // No overall timeout unless asked; large archives may take hours.
    if let Some(secs) = settings.timeout_secs {
        loader = loader.timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(secs))
                .build(),
        );
    }

    loader = loader.retry_config(
        RetryConfig::standard().with_max_attempts(settings.max_retries.saturating_add(1)),
    );

    if let Some(creds) = settings.credentials {
        loader = loader.credentials_provider(Credentials::new(
            creds.access_key_id.clone(),
            creds.secret_access_key.clone(),
            None,
            None,
            "coldkeep-static",
        ));
    }

    loader.load().await
}

/// Checks if an AWS SDK error indicates a "not found" condition.
pub(crate) fn is_not_found_error<E>(err: &SdkError<E, HttpResponse>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => service_err.raw().status().as_u16() == 404,
        _ => false,
    }
}
