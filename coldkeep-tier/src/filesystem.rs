//! Hot tier kept in a local directory.
//!
//! Each key is a relative path under the root, so `prod/web/files-….tar.gz`
//! becomes `{root}/prod/web/files-….tar.gz`. This is the backend for hosts
//! without an object store and for tests that want real files.
//!
//! Writes go to a `.part` sibling and are renamed into place once complete.
//! Listings skip `.part` files, so a half-written backup is never visible.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use coldkeep_core::{ObjectKey, StorageObject};
use tokio::io::AsyncWriteExt;

use crate::error::{TierError, TierResult};
use crate::storage::{ByteReader, ObjectStorage};

const PART_SUFFIX: &str = ".part";

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Where and how a [`FilesystemObjectStorage`] keeps its files.
#[derive(Debug, Clone)]
pub struct FilesystemConfig {
    /// Root directory; keys are resolved relative to it.
    pub base_path: PathBuf,

    /// Fsync each object before it is renamed into place. On by default.
    pub sync_on_write: bool,

    /// Create the root on open. On by default; with it off, a missing root
    /// shows up through [`ObjectStorage::bucket_exists`].
    pub create_if_missing: bool,
}

impl FilesystemConfig {
    /// Durable defaults rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            sync_on_write: true,
            create_if_missing: true,
        }
    }

    /// Like [`new`](Self::new) without fsync.
    #[must_use]
    pub fn for_testing(base_path: impl Into<PathBuf>) -> Self {
        Self {
            sync_on_write: false,
            ..Self::new(base_path)
        }
    }
}

// -----------------------------------------------------------------------------
// FilesystemObjectStorage
// -----------------------------------------------------------------------------

/// [`ObjectStorage`] over a directory tree.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStorage {
    config: FilesystemConfig,
}

fn io_at(operation: &'static str, path: &Path, e: &std::io::Error) -> TierError {
    TierError::Io {
        operation,
        message: format!("{}: {e}", path.display()),
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

impl FilesystemObjectStorage {
    /// Opens the root, creating it when configured to.
    ///
    /// # Errors
    ///
    /// [`TierError::Io`] if the root has to be created and cannot be.
    ///
    /// # Panics
    ///
    /// Panics if `base_path` is empty.
    pub async fn new(config: FilesystemConfig) -> TierResult<Self> {
        assert!(
            !config.base_path.as_os_str().is_empty(),
            "filesystem root must not be empty"
        );
        if config.create_if_missing {
            tokio::fs::create_dir_all(&config.base_path)
                .await
                .map_err(|e| io_at("create_root", &config.base_path, &e))?;
        }
        Ok(Self { config })
    }

    /// The root directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Bytes held under the root, excluding in-flight writes.
    ///
    /// # Errors
    ///
    /// Fails if the tree cannot be walked.
    pub async fn total_size(&self) -> TierResult<u64> {
        Ok(self.list("").await?.iter().map(|o| o.size).sum())
    }

    fn path_of(&self, key: &ObjectKey) -> PathBuf {
        assert!(!key.as_str().is_empty(), "object key must not be empty");
        self.config.base_path.join(key.as_str())
    }

    /// Copies `body` into `part`, returning the byte count.
    async fn fill_part(
        &self,
        key: &ObjectKey,
        part: &Path,
        mut body: ByteReader,
    ) -> TierResult<u64> {
        let failed = |step: &str, e: std::io::Error| TierError::UploadFailed {
            key: key.to_string(),
            message: format!("{step} {}: {e}", part.display()),
        };

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| failed("create", e))?;
        let copied = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| failed("write", e))?;
        file.flush().await.map_err(|e| failed("flush", e))?;
        if self.config.sync_on_write {
            file.sync_all().await.map_err(|e| failed("sync", e))?;
        }
        Ok(copied)
    }

    /// Collects every finished file whose key starts with `prefix`.
    async fn walk(&self, prefix: &str) -> TierResult<Vec<StorageObject>> {
        let root = &self.config.base_path;
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Removed between being seen and being read.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_at("list", &dir, &e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_at("list", &dir, &e))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| io_at("list", &path, &e))?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if !meta.is_file() || key.ends_with(PART_SUFFIX) || !key.starts_with(prefix) {
                    continue;
                }

                let modified: DateTime<Utc> = meta
                    .modified()
                    .map_err(|e| io_at("list", &path, &e))?
                    .into();
                found.push(StorageObject::new(key, meta.len(), modified));
            }
        }

        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }
}

fn read_failure(key: &ObjectKey, e: &std::io::Error) -> TierError {
    match e.kind() {
        ErrorKind::NotFound => TierError::NotFound {
            key: key.to_string(),
        },
        _ => TierError::DownloadFailed {
            key: key.to_string(),
            message: e.to_string(),
        },
    }
}

// -----------------------------------------------------------------------------
// ObjectStorage Implementation
// -----------------------------------------------------------------------------

#[async_trait]
impl ObjectStorage for FilesystemObjectStorage {
    async fn bucket_exists(&self) -> TierResult<bool> {
        match tokio::fs::metadata(&self.config.base_path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_at("bucket_exists", &self.config.base_path, &e)),
        }
    }

    async fn put(&self, key: &ObjectKey, data: Bytes) -> TierResult<()> {
        self.put_stream(key, Box::new(std::io::Cursor::new(data)))
            .await
            .map(drop)
    }

    async fn put_stream(&self, key: &ObjectKey, body: ByteReader) -> TierResult<u64> {
        let path = self.path_of(key);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_at("create_dirs", dir, &e))?;
        }

        let part = part_path(&path);
        let copied = match self.fill_part(key, &part, body).await {
            Ok(copied) => copied,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(TierError::UploadFailed {
                key: key.to_string(),
                message: format!("publish {}: {e}", path.display()),
            });
        }
        Ok(copied)
    }

    async fn get(&self, key: &ObjectKey) -> TierResult<Bytes> {
        tokio::fs::read(self.path_of(key))
            .await
            .map(Bytes::from)
            .map_err(|e| read_failure(key, &e))
    }

    async fn get_stream(&self, key: &ObjectKey) -> TierResult<ByteReader> {
        let file = tokio::fs::File::open(self.path_of(key))
            .await
            .map_err(|e| read_failure(key, &e))?;
        Ok(Box::new(file))
    }

    async fn list(&self, prefix: &str) -> TierResult<Vec<StorageObject>> {
        if !self.config.base_path.exists() {
            return Ok(Vec::new());
        }
        self.walk(prefix).await
    }

    async fn delete(&self, key: &ObjectKey) -> TierResult<()> {
        let path = self.path_of(key);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(io_at("delete", &path, &e)),
            _ => Ok(()),
        }
    }

    async fn exists(&self, key: &ObjectKey) -> TierResult<bool> {
        let path = self.path_of(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_at("exists", &path, &e)),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
