//! `LocalStack` integration tests for `S3ObjectStorage`.
//!
//! These tests require `LocalStack` to be running. Start it with:
//!
//! ```bash
//! docker run --rm -p 4566:4566 localstack/localstack
//! ```
//!
//! Create the test bucket:
//!
//! ```bash
//! aws --endpoint-url=http://localhost:4566 s3 mb s3://coldkeep-test
//! ```
//!
//! Run tests with:
//!
//! ```bash
//! cargo test -p coldkeep-tier --features s3 --test s3_integration -- --ignored
//! ```

#![cfg(feature = "s3")]

use bytes::Bytes;
use coldkeep_core::ObjectKey;
use coldkeep_tier::{ByteReader, ObjectStorage, S3Config, S3ObjectStorage, TierError};

const TEST_BUCKET: &str = "coldkeep-test";
const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

fn localstack_config() -> S3Config {
    S3Config::new(TEST_BUCKET)
        .with_endpoint(LOCALSTACK_ENDPOINT)
        .with_path_style()
        .with_region("us-east-1")
}

async fn create_storage() -> S3ObjectStorage {
    S3ObjectStorage::new(localstack_config())
        .await
        .expect("Failed to create S3 storage")
}

#[tokio::test]
#[ignore = "requires LocalStack"]
async fn test_s3_bucket_exists() {
    let storage = create_storage().await;
    assert!(storage.bucket_exists().await.expect("head bucket"));
}

#[tokio::test]
#[ignore = "requires LocalStack"]
async fn test_s3_put_get_roundtrip() {
    let storage = create_storage().await;
    let key = ObjectKey::new("integration/web/files-20240101-000000.tar");
    let data = Bytes::from_static(b"Hello, S3!");

    storage.put(&key, data.clone()).await.expect("put failed");
    assert_eq!(storage.get(&key).await.expect("get failed"), data);
    storage.delete(&key).await.expect("delete failed");
}

#[tokio::test]
#[ignore = "requires LocalStack"]
async fn test_s3_multipart_stream() {
    let storage = create_storage().await;
    let key = ObjectKey::new("integration/web/large-20240101-000000.tar");
    let payload: Vec<u8> = (0..20 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    let body: ByteReader = Box::new(std::io::Cursor::new(payload.clone()));
    let written = storage.put_stream(&key, body).await.expect("put_stream failed");
    assert_eq!(written, payload.len() as u64);

    let listed = storage.list("integration/web/large-").await.expect("list failed");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, payload.len() as u64);

    assert_eq!(storage.get(&key).await.expect("get failed").len(), payload.len());
    storage.delete(&key).await.expect("delete failed");
}

#[tokio::test]
#[ignore = "requires LocalStack"]
async fn test_s3_get_not_found() {
    let storage = create_storage().await;
    let key = ObjectKey::new("integration/nonexistent-key.bin");

    match storage.get(&key).await {
        Err(TierError::NotFound { key: k }) => assert!(k.contains("nonexistent-key.bin")),
        other => panic!("Expected NotFound error, got: {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires LocalStack"]
async fn test_s3_delete_many() {
    let storage = create_storage().await;
    let keys: Vec<_> = (0..5)
        .map(|i| ObjectKey::new(format!("integration/batch/obj-{i}.bin")))
        .collect();
    for key in &keys {
        storage.put(key, Bytes::from_static(b"x")).await.expect("put failed");
    }

    let results = storage.delete_many(&keys).await;
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert!(storage.list("integration/batch/").await.expect("list").is_empty());
}
