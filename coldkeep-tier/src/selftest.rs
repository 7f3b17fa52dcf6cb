//! Write-read-delete verification of a storage backend.
//!
//! A mismatch at any step means the backend cannot be trusted with backups
//! and is reported as [`TierError::Integrity`].

use std::time::{Duration, Instant};

use chrono::Utc;
use coldkeep_core::ObjectKey;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{TierError, TierResult};
use crate::scratch::ScratchSpace;
use crate::storage::{ByteReader, ObjectStorage};
use crate::vault::ArchiveVault;

/// Default self-test payload size.
pub const SELF_TEST_BYTES_DEFAULT: usize = 1024 * 1024;

/// Timings and identity of a passed self-test.
#[derive(Debug, Clone)]
pub struct SelfTestReport {
    /// Key written and removed.
    pub key: ObjectKey,
    /// Payload size.
    pub bytes: u64,
    /// SHA-256 of the payload, hex.
    pub sha256: String,
    /// Upload duration.
    pub write_elapsed: Duration,
    /// Download duration.
    pub read_elapsed: Duration,
}

fn payload(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    while data.len() < len {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        data.extend_from_slice(&state.to_le_bytes());
    }
    data.truncate(len);
    data
}

/// Writes, reads back, compares and deletes a probe object under `prefix`.
///
/// # Errors
///
/// Returns [`TierError::Integrity`] on any size, content or deletion
/// mismatch, or the backend error of a failed step.
pub async fn self_test(
    storage: &dyn ObjectStorage,
    prefix: &str,
    payload_bytes: usize,
) -> TierResult<SelfTestReport> {
    let prefix = prefix.trim_matches('/');
    let name = format!(".coldkeep-selftest-{}.bin", Utc::now().format("%Y%m%d-%H%M%S%.f"));
    let key = if prefix.is_empty() {
        ObjectKey::new(name)
    } else {
        ObjectKey::new(format!("{prefix}/{name}"))
    };

    let data = payload(payload_bytes);
    let expected = hex::encode(Sha256::digest(&data));

    let started = Instant::now();
    let body: ByteReader = Box::new(std::io::Cursor::new(data));
    let written = storage.put_stream(&key, body).await?;
    let write_elapsed = started.elapsed();

    let result = verify(storage, &key, payload_bytes as u64, written, &expected).await;
    let read_elapsed = started.elapsed().saturating_sub(write_elapsed);

    // Remove the probe even when verification failed.
    storage.delete(&key).await?;
    result?;

    if storage.exists(&key).await? {
        return Err(TierError::Integrity {
            key: key.to_string(),
            expected: "deleted".to_string(),
            actual: "still present".to_string(),
        });
    }

    info!(key = %key, bytes = payload_bytes, ?write_elapsed, ?read_elapsed, "Self-test passed");
    Ok(SelfTestReport {
        key,
        bytes: payload_bytes as u64,
        sha256: expected,
        write_elapsed,
        read_elapsed,
    })
}

async fn verify(
    storage: &dyn ObjectStorage,
    key: &ObjectKey,
    expected_len: u64,
    written: u64,
    expected_sha256: &str,
) -> TierResult<()> {
    let integrity = |expected: String, actual: String| TierError::Integrity {
        key: key.to_string(),
        expected,
        actual,
    };

    if written != expected_len {
        return Err(integrity(format!("{expected_len} bytes written"), format!("{written} bytes")));
    }

    let read_back = storage.get(key).await?;
    if read_back.len() as u64 != expected_len {
        return Err(integrity(
            format!("{expected_len} bytes"),
            format!("{} bytes", read_back.len()),
        ));
    }

    let actual = hex::encode(Sha256::digest(&read_back));
    if actual != expected_sha256 {
        return Err(integrity(expected_sha256.to_string(), actual));
    }
    Ok(())
}

/// Stages, uploads and deletes a small archive in `vault`.
///
/// # Errors
///
/// Returns the error of the failing step.
pub async fn vault_self_test(vault: &dyn ArchiveVault, scratch: &ScratchSpace) -> TierResult<()> {
    vault.ensure_vault().await?;
    let data = payload(64 * 1024);
    let staged = scratch.stage(data.as_slice()).await?;
    let id = vault.upload_archive(&staged, "coldkeep self-test").await?;
    vault.delete_archive(&id).await?;
    info!(vault = vault.name(), archive_id = %id, "Vault self-test passed");
    Ok(())
}
