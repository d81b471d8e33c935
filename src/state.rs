//! Shared state handed to every axum handler.

use crate::config::{AppConfig, DurableBackend};
use crate::services::{
    AccessResolver, IngestCoordinator, MetadataStore, SqliteMetadataStore, SyncConfig, SyncRunner,
    TransferPolicy, TransferWorker,
};
use crate::stores::{FsObjectStore, LocatorPolicy, LocatorSigner, ObjectStore, S3ObjectStore};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub fast: Arc<dyn ObjectStore>,
    pub ingest: IngestCoordinator,
    pub access: AccessResolver,
    pub sync: Arc<SyncRunner>,
    /// Present when the Fast tier issues signed locators served by `/objects`.
    pub signer: Option<LocatorSigner>,
    /// Fast-tier directory probed by `/readyz`, when the Fast tier is on disk.
    pub fast_fs: Option<Arc<FsObjectStore>>,
}

impl AppState {
    /// Wire the engine from explicit parts.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        fast: Arc<dyn ObjectStore>,
        durable: Arc<dyn ObjectStore>,
        policy: TransferPolicy,
        sync_config: SyncConfig,
        max_file_size_bytes: u64,
    ) -> Self {
        let access = AccessResolver::new(fast.clone(), durable.clone());
        let worker = Arc::new(TransferWorker::new(
            metadata.clone(),
            fast.clone(),
            durable,
            policy,
        ));
        Self {
            ingest: IngestCoordinator::new(
                metadata.clone(),
                fast.clone(),
                access.clone(),
                max_file_size_bytes,
            ),
            access,
            sync: Arc::new(SyncRunner::new(metadata.clone(), worker, sync_config)),
            metadata,
            fast,
            signer: None,
            fast_fs: None,
        }
    }

    /// Build the production wiring described by `cfg`.
    pub async fn from_config(cfg: &AppConfig, db: SqlitePool) -> Self {
        let signer = LocatorSigner::new(
            cfg.fast_public_url.clone(),
            &cfg.locator_secret,
            chrono::Duration::from_std(cfg.locator_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        );
        let fast_fs = Arc::new(FsObjectStore::new(
            "fast",
            cfg.fast_dir.clone(),
            LocatorPolicy::Signed(signer.clone()),
        ));

        let durable: Arc<dyn ObjectStore> = match &cfg.durable {
            DurableBackend::Fs { dir, public_url } => Arc::new(FsObjectStore::new(
                "durable",
                dir.clone(),
                LocatorPolicy::Stable {
                    base_url: public_url.clone(),
                },
            )),
            DurableBackend::S3(s3) => Arc::new(S3ObjectStore::new("durable", s3.clone()).await),
        };

        let policy = TransferPolicy {
            lease: cfg.sync_lease,
            delete_local_after_sync: cfg.delete_local_after_sync,
            max_attempts: cfg.sync_max_attempts,
        };
        let sync_config = SyncConfig {
            chunk_size: cfg.sync_chunk_size,
            workers: cfg.sync_workers,
        };

        let mut state = Self::new(
            Arc::new(SqliteMetadataStore::new(db)),
            fast_fs.clone(),
            durable,
            policy,
            sync_config,
            cfg.max_file_size_bytes,
        );
        state.signer = Some(signer);
        state.fast_fs = Some(fast_fs);
        state
    }
}
