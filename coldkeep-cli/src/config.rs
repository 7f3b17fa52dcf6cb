//! Layered configuration: `COLDKEEP_*` environment, then command-line flags.
//!
//! Each layer holds optional values. A value that is present in a higher
//! layer wins even when it is empty, so `--key-prefix ""` clears a prefix set
//! in the environment. Only an absent value falls through. Numeric and
//! boolean settings are typed: clap rejects bad flags while parsing, and
//! [`ConfigLayer::from_lookup`] rejects bad variables while reading.

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::Args;
use coldkeep_tier::{
    AwsCredentials, CommandRunner, FilesystemConfig, FilesystemObjectStorage, GlacierConfig,
    GlacierVault, LocalRunner, ObjectStorage, S3Config, S3ObjectStorage, SshRunner,
    StorageClients, TransferConfig,
};
use thiserror::Error;
use tracing::info;

/// Configuration errors, raised before any I/O.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is absent from every layer.
    #[error("missing configuration: set {flag} or {env}")]
    Missing {
        /// Command-line flag.
        flag: &'static str,
        /// Environment variable.
        env: &'static str,
    },

    /// Two settings exclude each other.
    #[error("conflicting configuration: {0}")]
    Conflict(&'static str),

    /// A setting could not be parsed.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Storage and transport flags shared by every command.
///
/// Every field falls back to the `COLDKEEP_*` variable named in its help.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigLayer {
    /// Hot-tier S3 bucket [env: `COLDKEEP_S3_BUCKET`].
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Hot-tier directory instead of S3 [env: `COLDKEEP_HOT_DIR`].
    #[arg(long, global = true)]
    pub hot_dir: Option<String>,

    /// AWS region [env: `COLDKEEP_REGION`].
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// S3-compatible endpoint URL [env: `COLDKEEP_S3_ENDPOINT`].
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Path-style S3 addressing, `true` or `false` [env: `COLDKEEP_S3_FORCE_PATH_STYLE`].
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub path_style: Option<bool>,

    /// Cold-tier vault name; empty disables the cold tier [env: `COLDKEEP_GLACIER_VAULT`].
    #[arg(long, global = true)]
    pub vault: Option<String>,

    /// Vault endpoint URL [env: `COLDKEEP_GLACIER_ENDPOINT`].
    #[arg(long, global = true)]
    pub vault_endpoint: Option<String>,

    /// Key prefix for every backup [env: `COLDKEEP_PREFIX`].
    #[arg(id = "key_prefix", long = "key-prefix", global = true)]
    pub prefix: Option<String>,

    /// Run captures and probes on this host over ssh [env: `COLDKEEP_SSH_HOST`].
    #[arg(long, global = true)]
    pub ssh_host: Option<String>,

    /// Remote user [env: `COLDKEEP_SSH_USER`].
    #[arg(long, global = true)]
    pub ssh_user: Option<String>,

    /// Remote port [env: `COLDKEEP_SSH_PORT`].
    #[arg(long, global = true)]
    pub ssh_port: Option<u16>,

    /// Private key file [env: `COLDKEEP_SSH_IDENTITY`].
    #[arg(long, global = true)]
    pub ssh_identity: Option<String>,

    /// Scratch directory for cold-tier staging [env: `COLDKEEP_SCRATCH_DIR`].
    #[arg(long, global = true)]
    pub scratch_dir: Option<String>,

    /// Overall timeout of one storage operation [env: `COLDKEEP_TIMEOUT_SECS`].
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// AWS access key id [env: `COLDKEEP_AWS_ACCESS_KEY_ID`].
    #[arg(skip)]
    pub access_key_id: Option<String>,

    /// AWS secret access key [env: `COLDKEEP_AWS_SECRET_ACCESS_KEY`].
    #[arg(skip)]
    pub secret_access_key: Option<String>,
}

impl ConfigLayer {
    /// Reads the `COLDKEEP_*` environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a typed variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads variables through `lookup`. Empty numeric variables count as
    /// unset; an empty path-style variable means `false`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a typed variable is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bucket: lookup("COLDKEEP_S3_BUCKET"),
            hot_dir: lookup("COLDKEEP_HOT_DIR"),
            region: lookup("COLDKEEP_REGION"),
            endpoint: lookup("COLDKEEP_S3_ENDPOINT"),
            path_style: lookup("COLDKEEP_S3_FORCE_PATH_STYLE")
                .map(|value| parse_bool("COLDKEEP_S3_FORCE_PATH_STYLE", &value))
                .transpose()?,
            vault: lookup("COLDKEEP_GLACIER_VAULT"),
            vault_endpoint: lookup("COLDKEEP_GLACIER_ENDPOINT"),
            prefix: lookup("COLDKEEP_PREFIX"),
            ssh_host: lookup("COLDKEEP_SSH_HOST"),
            ssh_user: lookup("COLDKEEP_SSH_USER"),
            ssh_port: lookup_number(&lookup, "COLDKEEP_SSH_PORT")?,
            ssh_identity: lookup("COLDKEEP_SSH_IDENTITY"),
            scratch_dir: lookup("COLDKEEP_SCRATCH_DIR"),
            timeout_secs: lookup_number(&lookup, "COLDKEEP_TIMEOUT_SECS")?,
            access_key_id: lookup("COLDKEEP_AWS_ACCESS_KEY_ID"),
            secret_access_key: lookup("COLDKEEP_AWS_SECRET_ACCESS_KEY"),
        })
    }

    /// Returns `self` with every value present in `over` replaced.
    #[must_use]
    pub fn overlay(self, over: Self) -> Self {
        Self {
            bucket: over.bucket.or(self.bucket),
            hot_dir: over.hot_dir.or(self.hot_dir),
            region: over.region.or(self.region),
            endpoint: over.endpoint.or(self.endpoint),
            path_style: over.path_style.or(self.path_style),
            vault: over.vault.or(self.vault),
            vault_endpoint: over.vault_endpoint.or(self.vault_endpoint),
            prefix: over.prefix.or(self.prefix),
            ssh_host: over.ssh_host.or(self.ssh_host),
            ssh_user: over.ssh_user.or(self.ssh_user),
            ssh_port: over.ssh_port.or(self.ssh_port),
            ssh_identity: over.ssh_identity.or(self.ssh_identity),
            scratch_dir: over.scratch_dir.or(self.scratch_dir),
            timeout_secs: over.timeout_secs.or(self.timeout_secs),
            access_key_id: over.access_key_id.or(self.access_key_id),
            secret_access_key: over.secret_access_key.or(self.secret_access_key),
        }
    }
}

/// Where the hot tier lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotTier {
    /// S3 or a compatible service.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Custom endpoint.
        endpoint: Option<String>,
        /// Path-style addressing.
        path_style: bool,
    },
    /// Local directory.
    Filesystem(PathBuf),
}

/// Remote transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    /// Host name.
    pub host: String,
    /// Remote user.
    pub user: Option<String>,
    /// Remote port.
    pub port: Option<u16>,
    /// Private key file.
    pub identity: Option<PathBuf>,
}

/// Fully resolved configuration of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Hot tier; only commands that touch storage require it.
    pub hot: Option<HotTier>,
    /// Cold-tier vault, if enabled.
    pub vault: Option<String>,
    /// Vault endpoint.
    pub vault_endpoint: Option<String>,
    /// AWS region.
    pub region: Option<String>,
    /// Key prefix (may be empty).
    pub prefix: String,
    /// Remote transport; local when absent.
    pub ssh: Option<SshSettings>,
    /// Scratch directory; the system temp dir when absent.
    pub scratch_dir: Option<PathBuf>,
    /// Operation timeout.
    pub timeout_secs: Option<u64>,
    /// Static credentials as `(access key id, secret)`.
    pub credentials: Option<(String, String)>,
}

/// Drops empty values for settings where empty means "not set".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("'{value}': {e}"),
    })
}

fn lookup_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    non_empty(lookup(var))
        .map(|value| parse_number(var, &value))
        .transpose()
}

impl Settings {
    /// Resolves a merged layer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if both hot tiers are named or only half of
    /// the static credentials is set.
    pub fn resolve(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let hot = match (non_empty(layer.bucket), non_empty(layer.hot_dir)) {
            (Some(_), Some(_)) => return Err(ConfigError::Conflict("--bucket and --hot-dir")),
            (None, None) => None,
            (Some(bucket), None) => Some(HotTier::S3 {
                bucket,
                endpoint: non_empty(layer.endpoint),
                path_style: layer.path_style.unwrap_or(false),
            }),
            (None, Some(dir)) => Some(HotTier::Filesystem(PathBuf::from(dir))),
        };

        let ssh = match non_empty(layer.ssh_host) {
            None => None,
            Some(host) => Some(SshSettings {
                host,
                user: non_empty(layer.ssh_user),
                port: layer.ssh_port,
                identity: non_empty(layer.ssh_identity).map(PathBuf::from),
            }),
        };

        let credentials = match (non_empty(layer.access_key_id), non_empty(layer.secret_access_key)) {
            (Some(id), Some(secret)) => Some((id, secret)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Missing {
                    flag: "both access key id and secret",
                    env: "COLDKEEP_AWS_ACCESS_KEY_ID and COLDKEEP_AWS_SECRET_ACCESS_KEY",
                })
            }
        };

        Ok(Self {
            hot,
            vault: non_empty(layer.vault),
            vault_endpoint: non_empty(layer.vault_endpoint),
            region: non_empty(layer.region),
            prefix: layer.prefix.unwrap_or_default(),
            ssh,
            scratch_dir: non_empty(layer.scratch_dir).map(PathBuf::from),
            timeout_secs: layer.timeout_secs,
            credentials,
        })
    }

    /// The hot tier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if neither a bucket nor a directory
    /// is configured.
    pub fn require_hot(&self) -> Result<&HotTier, ConfigError> {
        match &self.hot {
            Some(hot) => Ok(hot),
            None => Err(ConfigError::Missing {
                flag: "--bucket or --hot-dir",
                env: "COLDKEEP_S3_BUCKET or COLDKEEP_HOT_DIR",
            }),
        }
    }

    /// Prefix as passed to key builders: `None` when empty.
    #[must_use]
    pub fn key_prefix(&self) -> Option<&str> {
        Some(self.prefix.as_str()).filter(|p| !p.trim_matches('/').is_empty())
    }

    /// Listing prefix for `site`, or for every site when `None`.
    #[must_use]
    pub fn list_prefix(&self, site: Option<&str>) -> String {
        let base = self.prefix.trim_matches('/');
        match (base.is_empty(), site) {
            (true, None) => String::new(),
            (true, Some(site)) => format!("{site}/"),
            (false, None) => format!("{base}/"),
            (false, Some(site)) => format!("{base}/{site}/"),
        }
    }

    /// Builds the command transport.
    #[must_use]
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        match &self.ssh {
            None => Arc::new(LocalRunner),
            Some(ssh) => {
                let mut runner = SshRunner::new(&ssh.host);
                if let Some(user) = &ssh.user {
                    runner = runner.with_user(user);
                }
                if let Some(port) = ssh.port {
                    runner = runner.with_port(port);
                }
                if let Some(identity) = &ssh.identity {
                    runner = runner.with_identity_file(identity);
                }
                Arc::new(runner)
            }
        }
    }

    /// Builds the transfer configuration.
    #[must_use]
    pub fn transfer_config(&self) -> TransferConfig {
        match &self.scratch_dir {
            Some(dir) => TransferConfig::default().with_scratch_dir(dir),
            None => TransferConfig::default(),
        }
    }

    fn aws_credentials(&self) -> Option<AwsCredentials> {
        self.credentials
            .as_ref()
            .map(|(id, secret)| AwsCredentials::new(id, secret))
    }

    /// Constructs the storage clients for this invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be initialized.
    pub async fn build_clients(&self) -> anyhow::Result<StorageClients> {
        let hot: Arc<dyn ObjectStorage> = match self.require_hot()? {
            HotTier::S3 {
                bucket,
                endpoint,
                path_style,
            } => {
                let mut config = S3Config::new(bucket);
                if let Some(region) = &self.region {
                    config = config.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    config = config.with_endpoint(endpoint);
                }
                if *path_style {
                    config = config.with_path_style();
                }
                if let Some(secs) = self.timeout_secs {
                    config = config.with_timeout_secs(secs);
                }
                if let Some(credentials) = self.aws_credentials() {
                    config = config.with_credentials(credentials);
                }
                Arc::new(S3ObjectStorage::new(config).await?)
            }
            HotTier::Filesystem(dir) => {
                Arc::new(FilesystemObjectStorage::new(FilesystemConfig::new(dir)).await?)
            }
        };

        let mut clients = StorageClients::new(hot);

        if let Some(vault) = &self.vault {
            let mut config = GlacierConfig::new(vault);
            if let Some(region) = &self.region {
                config = config.with_region(region);
            }
            if let Some(endpoint) = &self.vault_endpoint {
                config = config.with_endpoint(endpoint);
            }
            if let Some(secs) = self.timeout_secs {
                config = config.with_timeout_secs(secs);
            }
            if let Some(credentials) = self.aws_credentials() {
                config = config.with_credentials(credentials);
            }
            clients = clients.with_cold(Arc::new(GlacierVault::new(config).await?));
        }

        info!(hot = ?self.hot, vault = ?self.vault, "Storage clients ready");
        Ok(clients)
    }
}
