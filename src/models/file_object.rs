//! Represents an uploaded file and the storage tier that currently holds it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Which backend holds the authoritative copy of a file.
///
/// Transitions are `LOCAL -> SYNCING -> REMOTE`, with `SYNCING -> LOCAL`
/// on failure or lease expiry. `REMOTE` is terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Tier {
    Local,
    Syncing,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "LOCAL",
            Tier::Syncing => "SYNCING",
            Tier::Remote => "REMOTE",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single uploaded file.
///
/// Descriptive fields (`original_name`, `size_bytes`, `content_type`) and
/// `object_key` are immutable after creation. Tier and lease fields are
/// mutated only through conditional updates in the metadata store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileObject {
    /// Unique identifier assigned at creation.
    pub id: Uuid,

    /// Uploading actor. Deduplication is scoped per owner.
    pub owner_id: String,

    /// Lowercase hex SHA-256 of the full content.
    pub fingerprint: String,

    /// Filename as supplied by the uploader.
    pub original_name: String,

    pub size_bytes: i64,

    pub content_type: String,

    /// Key under which both tiers store the payload.
    pub object_key: String,

    pub tier: Tier,

    /// Run that currently holds the claim. Set only while `SYNCING`.
    pub lease_owner: Option<String>,

    /// When the claim stops being valid. Set only while `SYNCING`.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Failed migration attempts since the last success.
    pub sync_attempts: i64,

    pub last_error: Option<String>,

    /// Locator recorded at the last tier change. Stable once `REMOTE`;
    /// for `LOCAL` it expires and must be regenerated on read.
    pub access_locator: String,

    pub uploaded_at: DateTime<Utc>,

    pub synced_at: Option<DateTime<Utc>>,
}

/// Fields supplied by ingest when creating a row.
#[derive(Clone, Debug)]
pub struct NewFileObject {
    pub owner_id: String,
    pub fingerprint: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub object_key: String,
    pub access_locator: String,
}

/// Result of a successful ingest call.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub file_id: Uuid,
    pub tier: Tier,
    pub access_locator: String,
    /// True when the owner already had identical content.
    pub duplicate: bool,
    #[serde(skip)]
    pub file: FileObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_stored_form() {
        for tier in [Tier::Local, Tier::Syncing, Tier::Remote] {
            let json = serde_json::to_string(&tier).unwrap();
            assert_eq!(json, format!("\"{}\"", tier));
        }
    }

    #[test]
    fn tier_serializes_uppercase() {
        let json = serde_json::to_string(&Tier::Syncing).unwrap();
        assert_eq!(json, "\"SYNCING\"");
    }
}
