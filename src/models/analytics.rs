//! Access events and per-owner usage reports.

use crate::models::Tier;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of read recorded in the access log.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccessAction {
    /// Metadata fetched through `GET /files/{id}`.
    View,
    /// Content served or redirected through `GET /files/{id}/download`.
    Download,
}

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierUsage {
    pub files: i64,
    pub bytes: i64,
}

/// An owner's most accessed file.
#[derive(Serialize, Clone, Debug, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessCount {
    pub file_id: Uuid,
    pub original_name: String,
    pub accesses: i64,
}

/// Totals for one owner, split by the tier currently holding each file.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_files: i64,
    pub total_bytes: i64,
    pub local: TierUsage,
    pub syncing: TierUsage,
    pub remote: TierUsage,
    pub total_downloads: i64,
    pub most_accessed: Vec<AccessCount>,
}

impl UsageSummary {
    /// Fold one `GROUP BY tier` row into the totals.
    pub fn add_tier(&mut self, tier: Tier, files: i64, bytes: i64) {
        let slot = match tier {
            Tier::Local => &mut self.local,
            Tier::Syncing => &mut self.syncing,
            Tier::Remote => &mut self.remote,
        };
        slot.files += files;
        slot.bytes += bytes;
        self.total_files += files;
        self.total_bytes += bytes;
    }
}

/// Storage used by one content-type category (`image`, `text`, ...).
#[derive(Serialize, Clone, Debug, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUsage {
    pub category: String,
    pub files: i64,
    pub bytes: i64,
}
