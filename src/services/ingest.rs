//! Upload ingestion with per-owner content deduplication.
//!
//! Bytes are fingerprinted while they stream into the Fast tier under a
//! fresh staging key. The metadata insert keyed by `(owner_id, fingerprint)`
//! then decides the winner: a new row keeps the staged copy, an existing row
//! (including one inserted by a concurrent upload that won the race) means
//! the staged copy is discarded and the existing file is returned.

use crate::errors::{EngineError, EngineResult};
use crate::models::{IngestOutcome, NewFileObject};
use crate::services::access::AccessResolver;
use crate::services::fingerprint::Fingerprinter;
use crate::services::metadata::{InsertOutcome, MetadataStore};
use crate::stores::{ByteStream, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One upload as handed over by the request layer. The caller has already
/// authenticated `owner_id`.
pub struct IngestRequest {
    pub owner_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    /// Advisory. Checked against the bytes actually written.
    pub declared_size: Option<u64>,
    pub body: ByteStream,
}

#[derive(Clone)]
pub struct IngestCoordinator {
    metadata: Arc<dyn MetadataStore>,
    fast: Arc<dyn ObjectStore>,
    access: AccessResolver,
    max_bytes: u64,
}

impl IngestCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        fast: Arc<dyn ObjectStore>,
        access: AccessResolver,
        max_bytes: u64,
    ) -> Self {
        Self {
            access,
            metadata,
            fast,
            max_bytes,
        }
    }

    /// Store an upload, or return the owner's existing copy of the same bytes.
    ///
    /// - `Validation` for bad names, empty or oversized content, or a
    ///   declared size that does not match what arrived
    /// - `BackendUnavailable` if the Fast tier rejects the write; nothing
    ///   is persisted and the caller should retry
    /// - `IngestFailed` if the upload stream itself broke
    pub async fn ingest(&self, req: IngestRequest) -> EngineResult<IngestOutcome> {
        ensure_name_valid("owner id", &req.owner_id)?;
        ensure_name_valid("filename", &req.filename)?;
        if let Some(declared) = req.declared_size {
            if declared > self.max_bytes {
                return Err(EngineError::Validation(format!(
                    "file size {} exceeds maximum of {} bytes",
                    declared, self.max_bytes
                )));
            }
        }

        let content_type = req
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let object_key = format!(
            "user-{}/{}-{}",
            key_segment(&req.owner_id),
            Uuid::new_v4(),
            key_segment(&req.filename)
        );

        let (body, fingerprint) = Fingerprinter::wrap(req.body, self.max_bytes);
        let locator = match self.fast.put(&object_key, &content_type, body).await {
            Ok(locator) => locator,
            Err(err) => {
                return Err(if fingerprint.oversized() {
                    EngineError::Validation(format!(
                        "file exceeds maximum of {} bytes",
                        self.max_bytes
                    ))
                } else if let Some(source) = fingerprint.source_error() {
                    EngineError::IngestFailed(source)
                } else {
                    warn!(owner_id = %req.owner_id, "fast tier write failed: {}", err);
                    EngineError::BackendUnavailable(err.to_string())
                });
            }
        };

        let fingerprint = fingerprint.finish();
        if fingerprint.size_bytes == 0 {
            self.discard(&object_key).await;
            return Err(EngineError::Validation("file is empty".into()));
        }
        if let Some(declared) = req.declared_size {
            if declared != fingerprint.size_bytes {
                self.discard(&object_key).await;
                return Err(EngineError::Validation(format!(
                    "declared size {} does not match received {} bytes",
                    declared, fingerprint.size_bytes
                )));
            }
        }

        let new = NewFileObject {
            owner_id: req.owner_id.clone(),
            fingerprint: fingerprint.digest.clone(),
            original_name: req.filename.clone(),
            size_bytes: fingerprint.size_bytes as i64,
            content_type,
            object_key: object_key.clone(),
            access_locator: locator.clone(),
        };

        match self.metadata.insert_if_absent(new).await {
            Ok(InsertOutcome::Inserted(file)) => {
                info!(
                    file_id = %file.id,
                    owner_id = %file.owner_id,
                    size_bytes = file.size_bytes,
                    "ingested new file"
                );
                Ok(IngestOutcome {
                    file_id: file.id,
                    tier: file.tier,
                    access_locator: locator,
                    duplicate: false,
                    file,
                })
            }
            Ok(InsertOutcome::Existing(file)) => {
                info!(
                    file_id = %file.id,
                    owner_id = %file.owner_id,
                    "duplicate content; returning existing file"
                );
                self.discard(&object_key).await;
                let access_locator = self.access.resolve(&file).await?;
                Ok(IngestOutcome {
                    file_id: file.id,
                    tier: file.tier,
                    access_locator,
                    duplicate: true,
                    file,
                })
            }
            Err(err) => {
                self.discard(&object_key).await;
                Err(err)
            }
        }
    }

    /// Best-effort removal of a staged Fast-tier write.
    async fn discard(&self, key: &str) {
        match self.fast.delete(key).await {
            Ok(()) => debug!(key, "discarded staged upload"),
            Err(err) => warn!(key, "failed to discard staged upload: {}", err),
        }
    }
}

fn ensure_name_valid(field: &str, value: &str) -> EngineResult<()> {
    let reason = if value.trim().is_empty() {
        Some("must not be empty")
    } else if value.len() > MAX_NAME_LEN {
        Some("must be at most 255 bytes")
    } else if value.contains('/') || value.contains('\\') || value.contains("..") {
        Some("must not contain path separators or `..`")
    } else if value.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(EngineError::Validation(format!("{} {}", field, reason))),
        None => Ok(()),
    }
}

/// Reduce a validated name to characters that are safe in keys and URLs.
fn key_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(ensure_name_valid("filename", "report.pdf").is_ok());
        assert!(ensure_name_valid("filename", "  ").is_err());
        assert!(ensure_name_valid("filename", "../etc/passwd").is_err());
        assert!(ensure_name_valid("filename", "a/b").is_err());
        assert!(ensure_name_valid("filename", &"x".repeat(256)).is_err());
        assert!(ensure_name_valid("filename", "bad\u{7}name").is_err());
    }

    #[test]
    fn key_segment_replaces_unsafe_characters() {
        assert_eq!(key_segment("my report (1).pdf"), "my_report__1_.pdf");
        assert_eq!(key_segment("résumé.txt"), "r_sum_.txt");
    }
}
