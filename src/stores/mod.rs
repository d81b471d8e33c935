//! Object store capability shared by the Fast and Durable tiers.
//!
//! The engine never names a concrete backend: ingest writes to whatever
//! `ObjectStore` is configured as the Fast tier and the transfer worker
//! copies between two trait objects. Backends:
//! - `FsObjectStore`: sharded directory tree on local disk
//! - `S3ObjectStore`: S3-compatible bucket (AWS S3, MinIO, R2, ...)
//! - `MemoryObjectStore`: in-process map with fault injection

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

pub mod fs;
pub mod locator;
pub mod memory;
pub mod s3;

pub use fs::FsObjectStore;
pub use locator::{LocatorPolicy, LocatorSigner};
pub use memory::MemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};

/// A stream of payload chunks. Read errors surface as `io::Error`.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("{backend} unavailable: {message}")]
    Unavailable { backend: String, message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Put/get/locate/delete byte streams by key.
///
/// `put` must overwrite an existing key so a retried transfer can always
/// redo the copy from scratch.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Stream `body` into `key` and return a locator for it.
    async fn put(&self, key: &str, content_type: &str, body: ByteStream) -> StoreResult<String>;

    /// Open `key` for streaming reads.
    async fn get(&self, key: &str) -> StoreResult<ByteStream>;

    /// Size in bytes as reported by the backend.
    async fn size(&self, key: &str) -> StoreResult<u64>;

    /// Locator for `key`. May be time-limited depending on the backend's policy.
    async fn url_for(&self, key: &str) -> StoreResult<String>;

    /// True if locators from `put`/`url_for` stop working after a while and
    /// must be regenerated on read.
    fn locators_expire(&self) -> bool {
        false
    }

    /// Remove `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Reject keys that could escape a backend's namespace.
pub(crate) fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || key.len() > 1024
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_absolute_keys() {
        assert!(ensure_key_safe("user-1/abc-report.pdf").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/etc/passwd").is_err());
        assert!(ensure_key_safe("user-1/../../x").is_err());
        assert!(ensure_key_safe("user-1/a\\b").is_err());
        assert!(ensure_key_safe("user-1/a\nb").is_err());
    }
}
