mod common;

use bytes::Bytes;
use common::{Harness, MAX_BYTES, body, request};
use futures::{StreamExt, stream};
use std::io;
use tiered_storage::{
    errors::EngineError,
    models::Tier,
    services::{IngestRequest, MetadataStore},
};

#[tokio::test]
async fn new_upload_lands_local_with_sha256_fingerprint() {
    let h = Harness::new().await;
    let outcome = h.upload("alice", "hello.txt", b"hello").await;

    assert!(!outcome.duplicate);
    assert_eq!(outcome.tier, Tier::Local);
    assert!(outcome.access_locator.starts_with("memory://fast/user-alice/"));

    let file = h.file(&outcome).await;
    assert_eq!(
        file.fingerprint,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert_eq!(file.size_bytes, 5);
    assert_eq!(file.content_type, "text/plain");
    assert_eq!(file.sync_attempts, 0);
    assert!(file.object_key.ends_with("-hello.txt"));
    assert_eq!(h.fast.bytes(&file.object_key).unwrap(), Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn same_owner_same_bytes_is_deduplicated() {
    let h = Harness::new().await;
    let first = h.upload("alice", "a.txt", b"same bytes").await;
    let second = h.upload("alice", "b.txt", b"same bytes").await;

    assert!(second.duplicate);
    assert_eq!(second.file_id, first.file_id);
    assert_eq!(h.fast.len(), 1, "staged copy of the duplicate is discarded");
    assert_eq!(h.metadata.list_by_owner("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_gets_fresh_fast_locator() {
    let h = Harness::new().await;
    let first = h.upload("alice", "a.txt", b"payload").await;
    let second = h.upload("alice", "a.txt", b"payload").await;

    assert!(second.duplicate);
    assert_ne!(first.access_locator, second.access_locator);
}

#[tokio::test]
async fn dedup_is_scoped_per_owner() {
    let h = Harness::new().await;
    let alice = h.upload("alice", "f.bin", b"shared content").await;
    let bob = h.upload("bob", "f.bin", b"shared content").await;

    assert!(!bob.duplicate);
    assert_ne!(alice.file_id, bob.file_id);
    assert_eq!(h.fast.len(), 2);
}

#[tokio::test]
async fn concurrent_identical_uploads_yield_one_file() {
    let h = Harness::new().await;
    let (a, b) = tokio::join!(
        h.state.ingest.ingest(request("alice", "one.txt", b"race me")),
        h.state.ingest.ingest(request("alice", "two.txt", b"race me")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.file_id, b.file_id);
    assert!(a.duplicate ^ b.duplicate, "exactly one upload wins");
    assert_eq!(h.metadata.list_by_owner("alice").await.unwrap().len(), 1);
    assert_eq!(h.fast.len(), 1);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let h = Harness::new().await;
    let err = h
        .state
        .ingest
        .ingest(request("alice", "empty.txt", b""))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(h.fast.is_empty());
    assert!(h.metadata.list_by_owner("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let h = Harness::new().await;
    let big = vec![7u8; MAX_BYTES as usize + 1];
    let err = h
        .state
        .ingest
        .ingest(IngestRequest {
            owner_id: "alice".into(),
            filename: "big.bin".into(),
            content_type: None,
            declared_size: None,
            body: stream::iter(vec![Ok::<_, io::Error>(Bytes::from(big))]).boxed(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(h.fast.is_empty());
}

#[tokio::test]
async fn declared_size_over_limit_is_rejected_before_reading() {
    let h = Harness::new().await;
    let mut req = request("alice", "big.bin", b"small");
    req.declared_size = Some(MAX_BYTES + 1);

    let err = h.state.ingest.ingest(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(h.fast.put_count(), 0);
}

#[tokio::test]
async fn declared_size_mismatch_is_rejected() {
    let h = Harness::new().await;
    let mut req = request("alice", "short.txt", b"12345");
    req.declared_size = Some(10);

    let err = h.state.ingest.ingest(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(h.fast.is_empty());
    assert!(h.metadata.list_by_owner("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn path_like_filename_is_rejected() {
    let h = Harness::new().await;
    let err = h
        .state
        .ingest
        .ingest(request("alice", "../etc/passwd", b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn fast_tier_offline_persists_nothing() {
    let h = Harness::new().await;
    h.fast.set_offline(true);

    let err = h
        .state
        .ingest
        .ingest(request("alice", "a.txt", b"data"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::BackendUnavailable(_)));
    assert!(h.metadata.list_by_owner("alice").await.unwrap().is_empty());

    h.fast.set_offline(false);
    let retried = h.upload("alice", "a.txt", b"data").await;
    assert!(!retried.duplicate);
}

#[tokio::test]
async fn broken_upload_stream_is_an_ingest_failure() {
    let h = Harness::new().await;
    let broken = stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ])
    .boxed();

    let err = h
        .state
        .ingest
        .ingest(IngestRequest {
            owner_id: "alice".into(),
            filename: "a.txt".into(),
            content_type: None,
            declared_size: None,
            body: broken,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::IngestFailed(_)));
    assert!(h.fast.is_empty());
    assert!(h.metadata.list_by_owner("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_content_type_defaults_to_octet_stream() {
    let h = Harness::new().await;
    let outcome = h
        .state
        .ingest
        .ingest(IngestRequest {
            owner_id: "alice".into(),
            filename: "blob".into(),
            content_type: None,
            declared_size: Some(4),
            body: body(b"blob"),
        })
        .await
        .unwrap();

    assert_eq!(h.file(&outcome).await.content_type, "application/octet-stream");
}
