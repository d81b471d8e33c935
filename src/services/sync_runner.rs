//! One sync run: select eligible files and migrate them in bounded batches.
//!
//! The runner has no timer of its own. Something external (cron via
//! `--sync-once`, or `POST /sync`) calls `run_sync`, which runs to completion
//! and returns its own `SyncSummary`. Overlapping runs are expected; the
//! claim in `TransferWorker` keeps them from processing the same file.

use crate::errors::EngineResult;
use crate::models::SyncSummary;
use crate::services::metadata::MetadataStore;
use crate::services::transfer::TransferWorker;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Files per batch.
    pub chunk_size: usize,
    /// Concurrent transfers within a batch.
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            workers: 3,
        }
    }
}

pub struct SyncRunner {
    metadata: Arc<dyn MetadataStore>,
    worker: Arc<TransferWorker>,
    config: SyncConfig,
}

impl SyncRunner {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        worker: Arc<TransferWorker>,
        config: SyncConfig,
    ) -> Self {
        Self {
            metadata,
            worker,
            config,
        }
    }

    /// Migrate every eligible file once.
    ///
    /// Per-file failures are counted, logged, and never abort the run. The
    /// only error returned is the metadata store failing the initial query.
    pub async fn run_sync(&self) -> EngineResult<SyncSummary> {
        let run_id = format!("run-{}", Uuid::new_v4());
        let max_attempts = self.worker.policy().max_attempts;

        let eligible = match self.metadata.list_eligible(Utc::now(), max_attempts).await {
            Ok(files) => files,
            Err(err) => {
                error!(run_id, "could not query eligible files: {}", err);
                return Err(err);
            }
        };

        let mut summary = SyncSummary::new(&run_id);
        if eligible.is_empty() {
            info!(run_id, "no files to sync");
            return Ok(summary);
        }

        let chunk_size = self.config.chunk_size.max(1);
        let workers = self.config.workers.max(1);
        let total_batches = eligible.len().div_ceil(chunk_size);
        info!(
            run_id,
            files = eligible.len(),
            batches = total_batches,
            workers,
            "starting sync run"
        );

        for (index, chunk) in eligible.chunks(chunk_size).enumerate() {
            let outcomes = stream::iter(chunk.iter().cloned())
                .map(|file| {
                    let worker = Arc::clone(&self.worker);
                    let run_id = run_id.clone();
                    async move { worker.migrate(&run_id, &file).await }
                })
                .buffer_unordered(workers)
                .collect::<Vec<_>>()
                .await;

            let mut batch = SyncSummary::new(&run_id);
            for outcome in outcomes {
                batch.record(outcome);
            }
            info!(
                run_id,
                "batch {}/{} complete: {} succeeded, {} failed, {} skipped",
                index + 1,
                total_batches,
                batch.succeeded,
                batch.failed,
                batch.skipped
            );
            summary.merge(batch);
        }

        info!(
            run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "sync run completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    // axum handlers need the run future to be `Send` for any borrow lifetime
    #[allow(dead_code)]
    fn run_sync_future_is_send(runner: &SyncRunner) {
        assert_send(&runner.run_sync());
    }
}
