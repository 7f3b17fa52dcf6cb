//! Object keys and storage objects.
//!
//! Backup keys follow the layout
//! `[<prefix>/]<site>/<label>-<YYYYMMDD-HHMMSS>.<ext>`. The timestamp suffix is
//! fixed-width, so lexical key order and chronological order agree for the
//! same site and label.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `chrono` format of the timestamp embedded in backup keys.
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Width of a formatted key timestamp (`YYYYMMDD-HHMMSS`).
const KEY_TIMESTAMP_LEN: usize = 15;

// -----------------------------------------------------------------------------
// ObjectKey
// -----------------------------------------------------------------------------

/// Object key in a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Creates a new object key from a string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Builds the key of a backup taken at `taken_at`.
    ///
    /// Format: `[<prefix>/]<site>/<label>-<YYYYMMDD-HHMMSS>.<ext>`
    ///
    /// # Errors
    ///
    /// Returns an error if `site` or `label` is empty or contains `/`, or if
    /// `extension` is empty.
    pub fn for_backup(
        prefix: Option<&str>,
        site: &str,
        label: &str,
        taken_at: DateTime<Utc>,
        extension: &str,
    ) -> Result<Self> {
        validate_component("site", site)?;
        validate_component("label", label)?;
        if extension.is_empty() {
            return Err(Error::InvalidKeyComponent {
                component: "extension",
                value: extension.to_string(),
                reason: "must not be empty",
            });
        }

        let stamp = taken_at.format(KEY_TIMESTAMP_FORMAT);
        let extension = extension.trim_start_matches('.');
        let key = match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{prefix}/{site}/{label}-{stamp}.{extension}"),
            None => format!("{site}/{label}-{stamp}.{extension}"),
        };
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final path component of the key.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Parses the timestamp embedded in a backup key.
    ///
    /// Returns `None` if the file name carries no `-YYYYMMDD-HHMMSS` suffix.
    /// When several candidates exist, the last one wins.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let name = self.file_name().as_bytes();
        if name.len() <= KEY_TIMESTAMP_LEN {
            return None;
        }

        let mut found = None;
        for start in 1..=(name.len() - KEY_TIMESTAMP_LEN) {
            let end = start + KEY_TIMESTAMP_LEN;
            if name[start - 1] != b'-' {
                continue;
            }
            if end < name.len() && name[end] != b'.' {
                continue;
            }
            let Ok(window) = std::str::from_utf8(&name[start..end]) else {
                continue;
            };
            if let Ok(naive) = NaiveDateTime::parse_from_str(window, KEY_TIMESTAMP_FORMAT) {
                found = Some(naive.and_utc());
            }
        }
        found
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ObjectKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn validate_component(component: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidKeyComponent {
            component,
            value: value.to_string(),
            reason: "must not be empty",
        });
    }
    if value.contains('/') {
        return Err(Error::InvalidKeyComponent {
            component,
            value: value.to_string(),
            reason: "must not contain '/'",
        });
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// StorageObject
// -----------------------------------------------------------------------------

/// An object stored in a storage tier.
///
/// Objects are immutable once written; deletion is the only mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Hierarchical object key.
    pub key: ObjectKey,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time reported by the backend.
    pub last_modified: DateTime<Utc>,
}

impl StorageObject {
    /// Creates a new storage object description.
    #[must_use]
    pub fn new(key: impl Into<ObjectKey>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
