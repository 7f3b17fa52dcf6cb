//! Scratch files for cold-tier staging.
//!
//! The vault API signs a seekable, length-known body, so a live stream is
//! first materialized into a uniquely named file under the scratch
//! directory. The file is hashed while it is written and deleted when the
//! [`StagedArchive`] is dropped, on success and failure paths alike.
//!
//! Every scratch file carries [`SCRATCH_PREFIX`]. When allocation fails with
//! exhausted disk space, files with that prefix that have not been modified
//! for [`SCRATCH_STALE_AFTER_SECS`] are removed and allocation is retried
//! once. Younger files are left alone, since another running invocation may
//! still be writing or uploading them.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use coldkeep_core::limits::{SCRATCH_PREFIX, SCRATCH_STALE_AFTER_SECS, STREAM_CHUNK_BYTES};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{TierError, TierResult};
use crate::tree_hash::{TreeDigest, TreeHasher};

/// A fully written scratch file and its digests.
///
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedArchive {
    path: TempPath,
    digest: TreeDigest,
}

impl StagedArchive {
    /// Path of the staged file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tree hash, linear digest and length of the staged bytes.
    #[must_use]
    pub const fn digest(&self) -> &TreeDigest {
        &self.digest
    }

    /// Staged length in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.digest.len
    }

    /// Returns true if nothing was staged.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.digest.len == 0
    }
}

/// Directory that scratch files are allocated in.
///
/// Clones share the injected-fault counter.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    dir: PathBuf,
    stale_after: Duration,
    injected_disk_full: Arc<AtomicU32>,
}

impl Default for ScratchSpace {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ScratchSpace {
    /// Creates scratch space rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_after: Duration::from_secs(SCRATCH_STALE_AFTER_SECS),
            injected_disk_full: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Sets how long a scratch file must sit unmodified before cleanup
    /// may remove it.
    #[must_use]
    pub const fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Scratch directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Makes the next `count` allocations fail as if the disk were full.
    pub fn inject_disk_full(&self, count: u32) {
        self.injected_disk_full.store(count, Ordering::SeqCst);
    }

    fn take_injected_fault(&self) -> bool {
        self.injected_disk_full
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn try_allocate(&self) -> io::Result<(std::fs::File, TempPath)> {
        if self.take_injected_fault() {
            return Err(io::Error::new(
                io::ErrorKind::StorageFull,
                "no space left on device (injected)",
            ));
        }
        let file = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        Ok(file.into_parts())
    }

    /// Allocates a new scratch file.
    ///
    /// On exhausted disk space, stale scratch files are removed and the
    /// allocation is retried exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::DiskFull`] if the retry also runs out of space,
    /// or an I/O error for any other failure.
    pub fn allocate(&self) -> TierResult<(tokio::fs::File, TempPath)> {
        let (file, path) = match self.try_allocate() {
            Ok(parts) => parts,
            Err(e) if e.kind() == io::ErrorKind::StorageFull => {
                warn!(dir = %self.dir.display(), error = %e, "Scratch allocation hit full disk, cleaning up");
                let removed = self.cleanup_stale()?;
                info!(dir = %self.dir.display(), removed, "Retrying scratch allocation");
                self.try_allocate().map_err(|e| self.map_io("allocate", &e))?
            }
            Err(e) => return Err(self.map_io("allocate", &e)),
        };
        Ok((tokio::fs::File::from_std(file), path))
    }

    /// Removes scratch files left behind in the scratch directory.
    ///
    /// Only files carrying the scratch prefix and unmodified for at least the
    /// stale age are touched. Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn cleanup_stale(&self) -> TierResult<usize> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| TierError::Io {
            operation: "cleanup_stale",
            message: format!("failed to read '{}': {e}", self.dir.display()),
        })?;

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let is_scratch = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));
            if !is_scratch || !self.is_stale(&entry, now) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => debug!(path = %entry.path().display(), error = %e, "Could not remove stale scratch file"),
            }
        }
        Ok(removed)
    }

    /// Unreadable or future mtimes count as fresh.
    fn is_stale(&self, entry: &std::fs::DirEntry, now: SystemTime) -> bool {
        entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= self.stale_after)
    }

    /// Writes `reader` to a new scratch file, hashing as it goes.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::DiskFull`] if space runs out, or an I/O error if
    /// reading or writing fails.
    pub async fn stage<R>(&self, mut reader: R) -> TierResult<StagedArchive>
    where
        R: AsyncRead + Unpin,
    {
        let (mut file, path) = self.allocate()?;
        let mut hasher = TreeHasher::new();
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| TierError::io("stage_read", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])
                .await
                .map_err(|e| self.map_io("stage_write", &e))?;
        }

        file.flush()
            .await
            .map_err(|e| self.map_io("stage_flush", &e))?;
        file.sync_all()
            .await
            .map_err(|e| self.map_io("stage_sync", &e))?;

        let digest = hasher.finalize();
        debug!(path = %path.display(), bytes = digest.len, tree_hash = %digest.tree_hash, "Staged archive");
        Ok(StagedArchive { path, digest })
    }

    fn map_io(&self, operation: &'static str, e: &io::Error) -> TierError {
        if e.kind() == io::ErrorKind::StorageFull {
            TierError::DiskFull {
                dir: self.dir.display().to_string(),
                message: e.to_string(),
            }
        } else {
            TierError::io(operation, e)
        }
    }
}
