//! Filesystem-backed object store.
//!
//! Payloads live beneath `root/{shard}/{shard}/{key}`, where the shards are
//! the first two bytes of MD5(key). Writes go to a temp file in the target
//! directory, are fsynced, and renamed into place so readers never observe
//! a partial object and a re-put of the same key overwrites atomically.

use super::{ByteStream, LocatorPolicy, ObjectStore, StoreError, StoreResult, ensure_key_safe};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

pub struct FsObjectStore {
    name: String,
    root: PathBuf,
    locators: LocatorPolicy,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, locators: LocatorPolicy) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            locators,
        }
    }

    /// Generate two-level shard identifiers for an object key.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn map_missing(&self, key: &str, err: io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::Io(err)
        }
    }

    /// Write the whole stream to `tmp_path`, fsyncing before returning.
    async fn write_temp(tmp_path: &Path, mut body: ByteStream) -> io::Result<()> {
        let mut file = File::create(tmp_path).await?;
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await
    }

    /// Remove empty directories from `start` upward, stopping at `self.root`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Cheap write/read/delete probe used by readiness checks.
    pub async fn probe(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        let tmp_path = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"probe").await?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read? != b"probe" {
            return Err(io::Error::other("probe content mismatch"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, _content_type: &str, body: ByteStream) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = Self::write_temp(&tmp_path, body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        debug!(store = %self.name, key, "stored object at {}", file_path.display());
        Ok(self.locators.locate(key, Utc::now()))
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        ensure_key_safe(key)?;
        let file = File::open(self.object_path(key))
            .await
            .map_err(|err| self.map_missing(key, err))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn size(&self, key: &str) -> StoreResult<u64> {
        ensure_key_safe(key)?;
        let meta = fs::metadata(self.object_path(key))
            .await
            .map_err(|err| self.map_missing(key, err))?;
        Ok(meta.len())
    }

    async fn url_for(&self, key: &str) -> StoreResult<String> {
        ensure_key_safe(key)?;
        Ok(self.locators.locate(key, Utc::now()))
    }

    fn locators_expire(&self) -> bool {
        self.locators.expires()
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn body(parts: &[&'static str]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(mut s: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn store(dir: &TempDir) -> FsObjectStore {
        FsObjectStore::new(
            "durable",
            dir.path(),
            LocatorPolicy::Stable {
                base_url: "https://archive.test".into(),
            },
        )
    }

    #[tokio::test]
    async fn put_get_size_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let locator = store
            .put("user-1/x-a.txt", "text/plain", body(&["hel", "lo"]))
            .await
            .unwrap();
        assert_eq!(locator, "https://archive.test/user-1/x-a.txt");
        assert_eq!(store.size("user-1/x-a.txt").await.unwrap(), 5);
        assert_eq!(collect(store.get("user-1/x-a.txt").await.unwrap()).await, b"hello");

        store.delete("user-1/x-a.txt").await.unwrap();
        assert!(matches!(
            store.size("user-1/x-a.txt").await,
            Err(StoreError::NotFound(_))
        ));
        // shard directories are pruned back to the root
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("k/one", "text/plain", body(&["first version"])).await.unwrap();
        store.put("k/one", "text/plain", body(&["v2"])).await.unwrap();
        assert_eq!(collect(store.get("k/one").await.unwrap()).await, b"v2");
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let broken: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("client went away")),
        ])
        .boxed();

        assert!(store.put("k/broken", "text/plain", broken).await.is_err());
        assert!(matches!(store.size("k/broken").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn deleting_missing_key_is_ok() {
        let dir = TempDir::new().unwrap();
        store(&dir).delete("nothing/here").await.unwrap();
    }
}
