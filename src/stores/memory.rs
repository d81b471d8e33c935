//! In-process object store with fault injection.
//!
//! Used to exercise migration logic without real backends: individual keys
//! can be made to fail on put, the whole backend can be taken offline, and
//! puts can be truncated to simulate a copy that reports the wrong size.

use super::{ByteStream, ObjectStore, StoreError, StoreResult, ensure_key_safe};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

/// Knobs for simulated failures.
#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    fail_put_keys: HashSet<String>,
    fail_delete: bool,
    truncate_puts: bool,
    put_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    name: String,
    objects: Mutex<HashMap<String, Bytes>>,
    faults: Mutex<Faults>,
    puts: AtomicU64,
    expiring: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Issue locators that change on every call, like a presigning backend.
    pub fn with_expiring_locators(self) -> Self {
        self.expiring.store(true, Ordering::SeqCst);
        self
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the whole backend offline (or bring it back).
    pub fn set_offline(&self, offline: bool) {
        self.faults().offline = offline;
    }

    /// Reject every put of `key` until cleared.
    pub fn fail_puts_for(&self, key: impl Into<String>) {
        self.faults().fail_put_keys.insert(key.into());
    }

    pub fn clear_put_failures(&self) {
        self.faults().fail_put_keys.clear();
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.faults().fail_delete = fail;
    }

    /// Store only the first half of every payload.
    pub fn set_truncate_puts(&self, truncate: bool) {
        self.faults().truncate_puts = truncate;
    }

    /// Stall every put for `delay` before reading the body.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        self.faults().put_delay = delay;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    pub fn bytes(&self, key: &str) -> Option<Bytes> {
        self.objects().get(key).cloned()
    }

    /// Number of successful puts since creation.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.faults().offline {
            return Err(self.unavailable("backend offline"));
        }
        Ok(())
    }

    fn unavailable(&self, message: &str) -> StoreError {
        StoreError::Unavailable {
            backend: self.name.clone(),
            message: message.to_string(),
        }
    }

    fn locator(&self, key: &str) -> String {
        if self.expiring.load(Ordering::SeqCst) {
            format!(
                "memory://{}/{}?nonce={}",
                self.name,
                key,
                uuid::Uuid::new_v4().simple()
            )
        } else {
            format!("memory://{}/{}", self.name, key)
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, _content_type: &str, mut body: ByteStream) -> StoreResult<String> {
        ensure_key_safe(key)?;
        self.check_online()?;
        if self.faults().fail_put_keys.contains(key) {
            return Err(self.unavailable("put rejected"));
        }
        let delay = self.faults().put_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let mut data = buf.freeze();
        if self.faults().truncate_puts {
            data.truncate(data.len() / 2);
        }

        self.objects().insert(key.to_string(), data);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(self.locator(key))
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        ensure_key_safe(key)?;
        self.check_online()?;
        let data = self
            .bytes(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(stream::iter(vec![Ok(data)]).boxed())
    }

    async fn size(&self, key: &str) -> StoreResult<u64> {
        self.check_online()?;
        self.objects()
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn url_for(&self, key: &str) -> StoreResult<String> {
        ensure_key_safe(key)?;
        self.check_online()?;
        Ok(self.locator(key))
    }

    fn locators_expire(&self) -> bool {
        self.expiring.load(Ordering::SeqCst)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_online()?;
        if self.faults().fail_delete {
            return Err(self.unavailable("delete rejected"));
        }
        self.objects().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(data: &'static [u8]) -> ByteStream {
        stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
    }

    #[tokio::test]
    async fn offline_backend_rejects_everything() {
        let store = MemoryObjectStore::new("durable");
        store.put("a/b", "text/plain", body(b"x")).await.unwrap();
        store.set_offline(true);
        assert!(matches!(
            store.put("a/c", "text/plain", body(b"x")).await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(store.size("a/b").await.is_err());
        store.set_offline(false);
        assert_eq!(store.size("a/b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn per_key_put_failures_and_truncation() {
        let store = MemoryObjectStore::new("durable");
        store.fail_puts_for("bad/key");
        assert!(store.put("bad/key", "text/plain", body(b"x")).await.is_err());
        assert!(store.put("good/key", "text/plain", body(b"x")).await.is_ok());

        store.set_truncate_puts(true);
        store.put("short/key", "text/plain", body(b"abcdef")).await.unwrap();
        assert_eq!(store.size("short/key").await.unwrap(), 3);
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn expiring_locators_differ_per_call() {
        let store = MemoryObjectStore::new("fast").with_expiring_locators();
        let a = store.url_for("k/1").await.unwrap();
        let b = store.url_for("k/1").await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("memory://fast/k/1?nonce="));
    }
}
