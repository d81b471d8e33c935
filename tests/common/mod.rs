#![allow(dead_code)]

use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{io, sync::Arc};
use tempfile::TempDir;
use tiered_storage::{
    db,
    models::{FileObject, IngestOutcome},
    services::{
        IngestRequest, MetadataStore, SqliteMetadataStore, SyncConfig, TransferPolicy,
    },
    state::AppState,
    stores::{ByteStream, MemoryObjectStore},
};

pub const MAX_BYTES: u64 = 1024 * 1024;

/// An engine over a throwaway SQLite file and two in-memory tiers.
pub struct Harness {
    pub state: AppState,
    pub metadata: Arc<SqliteMetadataStore>,
    pub fast: Arc<MemoryObjectStore>,
    pub durable: Arc<MemoryObjectStore>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_policy(TransferPolicy::default()).await
    }

    pub async fn with_policy(policy: TransferPolicy) -> Self {
        Self::build(policy, MemoryObjectStore::new("durable")).await
    }

    /// Durable tier hands out presigned locators that expire.
    pub async fn with_presigning_durable() -> Self {
        let durable = MemoryObjectStore::new("durable").with_expiring_locators();
        Self::build(TransferPolicy::default(), durable).await
    }

    async fn build(policy: TransferPolicy, durable: MemoryObjectStore) -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let pool = db::connect(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let metadata = Arc::new(SqliteMetadataStore::new(pool));
        let fast = Arc::new(MemoryObjectStore::new("fast").with_expiring_locators());
        let durable = Arc::new(durable);
        let state = AppState::new(
            metadata.clone(),
            fast.clone(),
            durable.clone(),
            policy,
            SyncConfig::default(),
            MAX_BYTES,
        );

        Self {
            state,
            metadata,
            fast,
            durable,
            _dir: dir,
        }
    }

    pub async fn upload(&self, owner: &str, name: &str, data: &'static [u8]) -> IngestOutcome {
        self.state
            .ingest
            .ingest(request(owner, name, data))
            .await
            .unwrap()
    }

    pub async fn file(&self, outcome: &IngestOutcome) -> FileObject {
        self.metadata.get(outcome.file_id).await.unwrap().unwrap()
    }
}

pub fn body(data: &'static [u8]) -> ByteStream {
    // two chunks so consumers see a real stream
    let (a, b) = data.split_at(data.len() / 2);
    stream::iter(vec![
        Ok::<_, io::Error>(Bytes::from_static(a)),
        Ok(Bytes::from_static(b)),
    ])
    .boxed()
}

pub fn request(owner: &str, name: &str, data: &'static [u8]) -> IngestRequest {
    IngestRequest {
        owner_id: owner.to_string(),
        filename: name.to_string(),
        content_type: Some("text/plain".to_string()),
        declared_size: None,
        body: body(data),
    }
}
