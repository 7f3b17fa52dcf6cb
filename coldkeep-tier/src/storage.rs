//! The hot tier: where every backup stream lands first.
//!
//! [`ObjectStorage`] is implemented by the S3 backend, the local directory
//! backend and [`SimulatedObjectStorage`], which tests drive with seeded
//! faults.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use coldkeep_core::{ObjectKey, StorageObject};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::dice::SeededDice;
use crate::error::{TierError, TierResult};

/// Boxed byte stream handed to and returned by storage backends.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

// -----------------------------------------------------------------------------
// ObjectStorage Trait
// -----------------------------------------------------------------------------

/// A bucket-like store of backup objects addressed by [`ObjectKey`].
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Checks that the configured bucket (or root) exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the check itself fails.
    async fn bucket_exists(&self) -> TierResult<bool>;

    /// Stores `data` under `key`, replacing any previous object.
    ///
    /// # Errors
    ///
    /// [`TierError::UploadFailed`] when the backend rejects the write.
    async fn put(&self, key: &ObjectKey, data: Bytes) -> TierResult<()>;

    /// Uploads a stream of unknown length, returning the bytes written.
    ///
    /// The stream is consumed incrementally; it is never buffered whole.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the stream or the upload fails.
    async fn put_stream(&self, key: &ObjectKey, body: ByteReader) -> TierResult<u64>;

    /// Reads a whole object into memory.
    ///
    /// # Errors
    ///
    /// [`TierError::NotFound`] for a missing key, otherwise the backend's
    /// read failure.
    async fn get(&self, key: &ObjectKey) -> TierResult<Bytes>;

    /// Opens an object as a byte stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    async fn get_stream(&self, key: &ObjectKey) -> TierResult<ByteReader>;

    /// Lists objects under `prefix`, recursively.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot enumerate the prefix.
    async fn list(&self, prefix: &str) -> TierResult<Vec<StorageObject>>;

    /// Deletes an object. Deleting a missing object succeeds.
    ///
    /// # Errors
    ///
    /// Fails when the backend refuses the delete.
    async fn delete(&self, key: &ObjectKey) -> TierResult<()>;

    /// Deletes many objects, reporting the outcome per key.
    ///
    /// The default issues one [`delete`](Self::delete) per key.
    async fn delete_many(&self, keys: &[ObjectKey]) -> Vec<(ObjectKey, TierResult<()>)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push((key.clone(), self.delete(key).await));
        }
        results
    }

    /// Reports whether `key` is present.
    ///
    /// # Errors
    ///
    /// Fails when presence cannot be determined.
    async fn exists(&self, key: &ObjectKey) -> TierResult<bool>;
}

/// Buffers a whole upload body, for the in-memory backend.
async fn read_all(key: &ObjectKey, mut body: ByteReader) -> TierResult<Vec<u8>> {
    let mut data = Vec::new();
    body.read_to_end(&mut data)
        .await
        .map_err(|e| TierError::UploadFailed {
            key: key.to_string(),
            message: format!("failed to read upload stream: {e}"),
        })?;
    Ok(data)
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Failures a [`SimulatedObjectStorage`] injects.
///
/// Rates are probabilities in `0.0..=1.0` drawn from the storage seed. The
/// `force_*` flags fire once and then clear themselves.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ObjectStorageFaultConfig {
    /// Chance that an upload is rejected.
    pub put_fail_rate: f64,
    /// Chance that a download is rejected.
    pub get_fail_rate: f64,
    /// Chance that a download returns one flipped byte.
    pub get_corruption_rate: f64,
    /// Chance that a delete is rejected.
    pub delete_fail_rate: f64,
    /// Rejects the next upload.
    pub force_put_fail: bool,
    /// Rejects the next download.
    pub force_get_fail: bool,
    /// Corrupts the next download.
    pub force_get_corruption: bool,
    /// Rejects the next delete.
    pub force_delete_fail: bool,
    /// Rejects every delete until cleared.
    pub deny_deletes: bool,
}

impl ObjectStorageFaultConfig {
    /// No injected failures.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Rare failures on every operation, roughly like a congested endpoint.
    #[must_use]
    pub fn flaky() -> Self {
        Self {
            put_fail_rate: 0.01,
            get_fail_rate: 0.01,
            get_corruption_rate: 0.001,
            delete_fail_rate: 0.001,
            ..Self::default()
        }
    }

    /// # Panics
    ///
    /// Panics unless `rate` is a probability.
    #[must_use]
    pub fn with_put_fail_rate(mut self, rate: f64) -> Self {
        assert_probability(rate);
        self.put_fail_rate = rate;
        self
    }

    /// # Panics
    ///
    /// Panics unless `rate` is a probability.
    #[must_use]
    pub fn with_get_fail_rate(mut self, rate: f64) -> Self {
        assert_probability(rate);
        self.get_fail_rate = rate;
        self
    }

    /// # Panics
    ///
    /// Panics unless `rate` is a probability.
    #[must_use]
    pub fn with_delete_fail_rate(mut self, rate: f64) -> Self {
        assert_probability(rate);
        self.delete_fail_rate = rate;
        self
    }

    /// Rejects the next upload only.
    #[must_use]
    pub const fn with_force_put_fail(mut self) -> Self {
        self.force_put_fail = true;
        self
    }

    /// Corrupts the next download only.
    #[must_use]
    pub const fn with_force_get_corruption(mut self) -> Self {
        self.force_get_corruption = true;
        self
    }

    /// Rejects every delete.
    #[must_use]
    pub const fn with_deny_deletes(mut self) -> Self {
        self.deny_deletes = true;
        self
    }
}

fn assert_probability(rate: f64) {
    assert!((0.0..=1.0).contains(&rate), "fault rate {rate} outside 0.0..=1.0");
}

// -----------------------------------------------------------------------------
// SimulatedObjectStorage
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Blob {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Shelf {
    blobs: HashMap<ObjectKey, Blob>,
    faults: ObjectStorageFaultConfig,
}

/// What a download should do once faults have been consulted.
enum Fetch {
    Reject(&'static str),
    Serve { corrupt: bool },
}

/// In-memory hot tier with seeded fault injection.
///
/// Uploads are stamped with the current time; [`insert_object`] sets any
/// time, which is how tests lay down a backup history. Clones share state,
/// so a test can keep one handle while the code under test owns another.
///
/// [`insert_object`]: Self::insert_object
#[derive(Debug, Clone)]
pub struct SimulatedObjectStorage {
    shelf: Arc<Mutex<Shelf>>,
    dice: SeededDice,
}

impl SimulatedObjectStorage {
    /// An empty store that never fails.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, ObjectStorageFaultConfig::none())
    }

    /// An empty store that injects `faults`, drawn from `seed`.
    #[must_use]
    pub fn with_faults(seed: u64, faults: ObjectStorageFaultConfig) -> Self {
        Self {
            shelf: Arc::new(Mutex::new(Shelf {
                blobs: HashMap::new(),
                faults,
            })),
            dice: SeededDice::new(seed),
        }
    }

    fn shelf(&self) -> MutexGuard<'_, Shelf> {
        self.shelf.lock().expect("simulated storage lock poisoned")
    }

    /// Live view of the injected faults, for changing them mid-test.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked.
    pub fn fault_config(&self) -> FaultConfigGuard<'_> {
        FaultConfigGuard(self.shelf())
    }

    /// Stores `data` under `key` with an explicit modification time.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked.
    pub fn insert_object(&self, key: &ObjectKey, data: Vec<u8>, last_modified: DateTime<Utc>) {
        self.shelf().blobs.insert(
            key.clone(),
            Blob {
                data,
                last_modified,
            },
        );
    }

    /// Stored bytes, bypassing fault injection.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked.
    #[must_use]
    pub fn get_raw_content(&self, key: &ObjectKey) -> Option<Vec<u8>> {
        self.shelf().blobs.get(key).map(|b| b.data.clone())
    }

    /// # Panics
    ///
    /// Panics if a previous holder panicked.
    #[must_use]
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.shelf().blobs.contains_key(key)
    }

    /// # Panics
    ///
    /// Panics if a previous holder panicked.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.shelf().blobs.len()
    }

    /// Sum of all stored object sizes.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.shelf().blobs.values().map(|b| b.data.len() as u64).sum()
    }

    fn admit_put(&self, key: &ObjectKey) -> TierResult<()> {
        let (forced, rate) = {
            let mut shelf = self.shelf();
            let faults = &mut shelf.faults;
            (std::mem::take(&mut faults.force_put_fail), faults.put_fail_rate)
        };
        let reason = if forced {
            Some("forced")
        } else if self.dice.roll(rate) {
            Some("random")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TierError::UploadFailed {
                key: key.to_string(),
                message: format!("simulated upload rejection ({reason})"),
            }),
            None => Ok(()),
        }
    }

    fn plan_fetch(&self) -> Fetch {
        let (forced_fail, forced_corrupt, fail_rate, corrupt_rate) = {
            let mut shelf = self.shelf();
            let faults = &mut shelf.faults;
            (
                std::mem::take(&mut faults.force_get_fail),
                std::mem::take(&mut faults.force_get_corruption),
                faults.get_fail_rate,
                faults.get_corruption_rate,
            )
        };
        if forced_fail {
            return Fetch::Reject("forced");
        }
        if self.dice.roll(fail_rate) {
            return Fetch::Reject("random");
        }
        Fetch::Serve {
            corrupt: forced_corrupt || self.dice.roll(corrupt_rate),
        }
    }

    fn admit_delete(&self) -> bool {
        let (refused, rate) = {
            let mut shelf = self.shelf();
            let faults = &mut shelf.faults;
            (
                std::mem::take(&mut faults.force_delete_fail) || faults.deny_deletes,
                faults.delete_fail_rate,
            )
        };
        !refused && !self.dice.roll(rate)
    }
}

/// Guard returned by [`SimulatedObjectStorage::fault_config`].
pub struct FaultConfigGuard<'a>(MutexGuard<'a, Shelf>);

impl std::ops::Deref for FaultConfigGuard<'_> {
    type Target = ObjectStorageFaultConfig;

    fn deref(&self) -> &Self::Target {
        &self.0.faults
    }
}

impl std::ops::DerefMut for FaultConfigGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0.faults
    }
}

pub(crate) fn require_key(key: &ObjectKey) {
    assert!(!key.as_str().is_empty(), "object key must not be empty");
}

#[async_trait]
impl ObjectStorage for SimulatedObjectStorage {
    async fn bucket_exists(&self) -> TierResult<bool> {
        Ok(true)
    }

    async fn put(&self, key: &ObjectKey, data: Bytes) -> TierResult<()> {
        require_key(key);
        self.admit_put(key)?;
        self.insert_object(key, data.to_vec(), Utc::now());
        Ok(())
    }

    async fn put_stream(&self, key: &ObjectKey, body: ByteReader) -> TierResult<u64> {
        require_key(key);
        // Rejected before the body is read, like a refused request.
        self.admit_put(key)?;
        let data = read_all(key, body).await?;
        let written = data.len() as u64;
        self.insert_object(key, data, Utc::now());
        Ok(written)
    }

    async fn get(&self, key: &ObjectKey) -> TierResult<Bytes> {
        require_key(key);
        let corrupt = match self.plan_fetch() {
            Fetch::Reject(reason) => {
                return Err(TierError::DownloadFailed {
                    key: key.to_string(),
                    message: format!("simulated download rejection ({reason})"),
                })
            }
            Fetch::Serve { corrupt } => corrupt,
        };

        let mut data = self.get_raw_content(key).ok_or_else(|| TierError::NotFound {
            key: key.to_string(),
        })?;
        if corrupt && !data.is_empty() {
            let at = self.dice.pick(data.len());
            data[at] ^= 0xFF;
        }
        Ok(Bytes::from(data))
    }

    async fn get_stream(&self, key: &ObjectKey) -> TierResult<ByteReader> {
        let data = self.get(key).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn list(&self, prefix: &str) -> TierResult<Vec<StorageObject>> {
        let mut listed: Vec<_> = self
            .shelf()
            .blobs
            .iter()
            .filter(|(key, _)| key.as_str().starts_with(prefix))
            .map(|(key, blob)| {
                StorageObject::new(key.clone(), blob.data.len() as u64, blob.last_modified)
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    async fn delete(&self, key: &ObjectKey) -> TierResult<()> {
        require_key(key);
        if !self.admit_delete() {
            return Err(TierError::Io {
                operation: "delete",
                message: format!("simulated delete rejection for {key}"),
            });
        }
        let mut shelf = self.shelf();
        shelf.blobs.remove(key);
        debug_assert!(!shelf.blobs.contains_key(key));
        drop(shelf);
        Ok(())
    }

    async fn exists(&self, key: &ObjectKey) -> TierResult<bool> {
        require_key(key);
        Ok(self.contains(key))
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(format!("hot/site/{name}"))
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let hot = SimulatedObjectStorage::new(42);
        let key = key("a.tar");
        assert!(!hot.exists(&key).await.unwrap());

        hot.put(&key, Bytes::from_static(b"payload")).await.unwrap();
        assert!(hot.exists(&key).await.unwrap());
        assert_eq!(&hot.get(&key).await.unwrap()[..], b"payload");
        assert_eq!(hot.total_bytes(), 7);

        hot.delete(&key).await.unwrap();
        // Deleting again is not an error.
        hot.delete(&key).await.unwrap();
        assert_eq!(hot.object_count(), 0);
    }

    #[tokio::test]
    async fn test_put_stream_counts_bytes() {
        let hot = SimulatedObjectStorage::new(42);
        let key = key("stream.tar");
        let body: ByteReader = Box::new(std::io::Cursor::new(vec![7u8; 10_000]));

        assert_eq!(hot.put_stream(&key, body).await.unwrap(), 10_000);
        assert_eq!(hot.get_raw_content(&key).map(|d| d.len()), Some(10_000));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let hot = SimulatedObjectStorage::new(42);
        let err = hot.get(&key("missing")).await.unwrap_err();
        assert!(matches!(err, TierError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_forced_faults_fire_once() {
        let hot = SimulatedObjectStorage::with_faults(
            42,
            ObjectStorageFaultConfig::none()
                .with_force_put_fail()
                .with_force_get_corruption(),
        );
        let key = key("a.tar");

        let err = hot.put(&key, Bytes::from_static(b"data")).await.unwrap_err();
        assert!(matches!(err, TierError::UploadFailed { .. }));
        hot.put(&key, Bytes::from_static(b"original")).await.unwrap();

        assert_ne!(&hot.get(&key).await.unwrap()[..], b"original");
        assert_eq!(&hot.get(&key).await.unwrap()[..], b"original");
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let hot = SimulatedObjectStorage::new(42);
        let at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        hot.insert_object(&key("b.tar"), vec![0; 5], at);
        hot.insert_object(&key("a.tar"), vec![0; 3], at);
        hot.insert_object(&ObjectKey::new("other/x.tar"), vec![0; 1], at);

        let listed = hot.list("hot/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.clone()).collect();
        assert_eq!(keys, vec![key("a.tar"), key("b.tar")]);
        assert_eq!(listed[0].size, 3);
        assert_eq!(listed[1].last_modified, at);
    }

    #[tokio::test]
    async fn test_denied_deletes_keep_objects() {
        let hot = SimulatedObjectStorage::new(42);
        let key = key("a.tar");
        hot.put(&key, Bytes::from_static(b"x")).await.unwrap();
        hot.fault_config().deny_deletes = true;

        let results = hot.delete_many(std::slice::from_ref(&key)).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_err());
        assert!(hot.contains(&key));

        hot.fault_config().deny_deletes = false;
        assert!(hot.delete(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_see_each_other() {
        let hot = SimulatedObjectStorage::new(42);
        let other = hot.clone();
        other.put(&key("a.tar"), Bytes::from_static(b"x")).await.unwrap();
        assert!(hot.contains(&key("a.tar")));
    }

    #[tokio::test]
    async fn test_seeded_faults_replay() {
        let faults = ObjectStorageFaultConfig::none().with_put_fail_rate(0.5);
        let first = SimulatedObjectStorage::with_faults(12345, faults.clone());
        let second = SimulatedObjectStorage::with_faults(12345, faults);
        let key = key("a.tar");

        let mut outcomes = (Vec::new(), Vec::new());
        for _ in 0..16 {
            outcomes.0.push(first.put(&key, Bytes::from_static(b"x")).await.is_ok());
            outcomes.1.push(second.put(&key, Bytes::from_static(b"x")).await.is_ok());
        }
        assert_eq!(outcomes.0, outcomes.1);
    }
}
