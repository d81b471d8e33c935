//! Migrates one file from the Fast tier to the Durable tier.
//!
//! claim -> copy -> verify -> commit -> optional cleanup, with revert on
//! any failure after the claim. Every outcome is returned as a value; the
//! worker never propagates an error to the run.

use crate::errors::{EngineError, EngineResult};
use crate::models::{FileObject, TransferOutcome};
use crate::services::metadata::MetadataStore;
use crate::stores::ObjectStore;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Knobs shared by every transfer in a run.
#[derive(Debug, Clone)]
pub struct TransferPolicy {
    /// How long a claim stays valid. Transfers that outlive it are aborted.
    pub lease: Duration,
    /// Remove the Fast-tier copy once `REMOTE` is committed.
    pub delete_local_after_sync: bool,
    /// Attempts after which a file is no longer selected. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(900),
            delete_local_after_sync: false,
            max_attempts: None,
        }
    }
}

pub struct TransferWorker {
    metadata: Arc<dyn MetadataStore>,
    fast: Arc<dyn ObjectStore>,
    durable: Arc<dyn ObjectStore>,
    policy: TransferPolicy,
}

impl TransferWorker {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        fast: Arc<dyn ObjectStore>,
        durable: Arc<dyn ObjectStore>,
        policy: TransferPolicy,
    ) -> Self {
        Self {
            metadata,
            fast,
            durable,
            policy,
        }
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Drive `file` to `REMOTE` on behalf of `run_id`.
    pub async fn migrate(&self, run_id: &str, file: &FileObject) -> TransferOutcome {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.policy.lease)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        let claimed = match self
            .metadata
            .try_claim(file.id, run_id, now, now + lease)
            .await
        {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!(file_id = %file.id, run_id, "claim lost to another run; skipping");
                return TransferOutcome::Skipped;
            }
            Err(err) => {
                warn!(file_id = %file.id, run_id, "claim failed: {}", err);
                return TransferOutcome::Failed(format!("file {}: claim failed: {}", file.id, err));
            }
        };

        debug!(
            file_id = %claimed.id,
            run_id,
            attempt = claimed.sync_attempts + 1,
            from = self.fast.name(),
            to = self.durable.name(),
            "claimed file for transfer"
        );

        let copied = match tokio::time::timeout(self.policy.lease, self.copy_and_verify(&claimed))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::BackendUnavailable(format!(
                "transfer exceeded lease of {:?}",
                self.policy.lease
            ))),
        };

        match copied {
            Ok(locator) => self.commit(run_id, &claimed, &locator).await,
            Err(err) => self.revert(run_id, &claimed, &err.to_string()).await,
        }
    }

    /// Stream Fast -> Durable under the same key, then check the size.
    async fn copy_and_verify(&self, file: &FileObject) -> EngineResult<String> {
        let source = self.fast.get(&file.object_key).await?;
        let locator = self
            .durable
            .put(&file.object_key, &file.content_type, source)
            .await?;

        let expected = file.size_bytes.max(0) as u64;
        let actual = self.durable.size(&file.object_key).await?;
        if actual != expected {
            return Err(EngineError::TransferVerificationFailed { expected, actual });
        }
        Ok(locator)
    }

    async fn commit(&self, run_id: &str, file: &FileObject, locator: &str) -> TransferOutcome {
        match self
            .metadata
            .commit(file.id, run_id, Utc::now(), locator)
            .await
        {
            Ok(Some(committed)) => {
                info!(
                    file_id = %committed.id,
                    owner_id = %committed.owner_id,
                    run_id,
                    durable = self.durable.name(),
                    "file synced to durable tier"
                );
                if self.policy.delete_local_after_sync {
                    self.cleanup(&committed).await;
                }
                TransferOutcome::Succeeded
            }
            Ok(None) => self.revert(run_id, file, "lease lost before commit").await,
            Err(err) => {
                self.revert(run_id, file, &format!("commit failed: {}", err))
                    .await
            }
        }
    }

    /// Delete the Fast-tier copy. `REMOTE` stays committed whatever happens.
    async fn cleanup(&self, file: &FileObject) {
        match self.fast.delete(&file.object_key).await {
            Ok(()) => debug!(file_id = %file.id, "deleted fast-tier copy"),
            Err(err) => warn!(
                file_id = %file.id,
                fast = self.fast.name(),
                "failed to delete fast-tier copy after sync: {}", err
            ),
        }
    }

    async fn revert(&self, run_id: &str, file: &FileObject, reason: &str) -> TransferOutcome {
        match self.metadata.revert(file.id, run_id, reason).await {
            Ok(Some(reverted)) => {
                warn!(
                    file_id = %reverted.id,
                    run_id,
                    attempt = reverted.sync_attempts,
                    "sync failed, file left LOCAL for retry: {}", reason
                );
                if let Some(max) = self.policy.max_attempts {
                    if reverted.sync_attempts >= i64::from(max) {
                        warn!(
                            file_id = %reverted.id,
                            attempts = reverted.sync_attempts,
                            "file reached max sync attempts; it will no longer be retried"
                        );
                    }
                }
                TransferOutcome::Failed(format!("file {}: {}", file.id, reason))
            }
            Ok(None) => {
                debug!(
                    file_id = %file.id,
                    run_id,
                    "lease taken over by another run; leaving file alone"
                );
                TransferOutcome::Skipped
            }
            Err(err) => {
                error!(
                    file_id = %file.id,
                    run_id,
                    "revert failed, lease will expire instead: {}", err
                );
                TransferOutcome::Failed(format!("file {}: {}", file.id, reason))
            }
        }
    }
}
