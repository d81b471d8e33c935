//! Metadata persistence for `FileObject` rows and their access log.
//!
//! The engine depends on `MetadataStore` only. Every tier change is a
//! single-row conditional update, so correctness holds across any number
//! of processes and restarts without in-process locks:
//! - claim:  `LOCAL` (or `SYNCING` with an expired lease) -> `SYNCING`
//! - commit: `SYNCING` held by this run and unexpired -> `REMOTE`
//! - revert: `SYNCING` held by this run -> `LOCAL`
//!
//! Uniqueness of `(owner_id, fingerprint)` is enforced by the schema and is
//! the arbiter for concurrent uploads of identical content.

use crate::errors::{EngineError, EngineResult};
use crate::models::{
    AccessAction, AccessCount, CategoryUsage, FileObject, NewFileObject, Tier, UsageSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// Outcome of an insert keyed by `(owner_id, fingerprint)`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(FileObject),
    /// A row with the same owner and fingerprint already existed.
    Existing(FileObject),
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new `LOCAL` row unless the owner already has this fingerprint.
    async fn insert_if_absent(&self, new: NewFileObject) -> EngineResult<InsertOutcome>;

    async fn get(&self, id: Uuid) -> EngineResult<Option<FileObject>>;

    async fn find_by_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &str,
    ) -> EngineResult<Option<FileObject>>;

    /// The row whose payload lives under `object_key`, if any.
    async fn find_by_object_key(&self, object_key: &str) -> EngineResult<Option<FileObject>>;

    /// Owner's files, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> EngineResult<Vec<FileObject>>;

    /// `LOCAL` rows plus `SYNCING` rows whose lease expired at or before
    /// `now`. Rows with `sync_attempts >= max_attempts` are left out.
    async fn list_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: Option<u32>,
    ) -> EngineResult<Vec<FileObject>>;

    /// Claim `id` for `lease_owner` until `expires_at`. `None` means another
    /// run holds a live lease or the row is no longer eligible. Taking over
    /// an expired lease counts the abandoned run as a failed attempt.
    async fn try_claim(
        &self,
        id: Uuid,
        lease_owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<Option<FileObject>>;

    /// Promote to `REMOTE`. `None` means the lease was lost or expired.
    async fn commit(
        &self,
        id: Uuid,
        lease_owner: &str,
        now: DateTime<Utc>,
        access_locator: &str,
    ) -> EngineResult<Option<FileObject>>;

    /// Return to `LOCAL`, bump `sync_attempts`, record `error`. `None` means
    /// `lease_owner` no longer holds the row.
    async fn revert(
        &self,
        id: Uuid,
        lease_owner: &str,
        error: &str,
    ) -> EngineResult<Option<FileObject>>;

    /// Append one event to the access log.
    async fn record_access(
        &self,
        file_id: Uuid,
        owner_id: &str,
        action: AccessAction,
        at: DateTime<Utc>,
    ) -> EngineResult<()>;

    /// Counts and bytes per tier, download total, and the `top` most
    /// accessed files for `owner_id`.
    async fn usage_summary(&self, owner_id: &str, top: u32) -> EngineResult<UsageSummary>;

    /// Usage grouped by the part of `content_type` before `/`, largest first.
    async fn storage_breakdown(&self, owner_id: &str) -> EngineResult<Vec<CategoryUsage>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> EngineResult<()>;
}

const FILE_COLUMNS: &str = "id, owner_id, fingerprint, original_name, size_bytes, content_type, \
     object_key, tier, lease_owner, lease_expires_at, sync_attempts, last_error, \
     access_locator, uploaded_at, synced_at";

/// `MetadataStore` backed by the `files` table in SQLite.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_if_absent(&self, new: NewFileObject) -> EngineResult<InsertOutcome> {
        let sql = format!(
            "INSERT INTO files (
                 id, owner_id, fingerprint, original_name, size_bytes, content_type,
                 object_key, tier, sync_attempts, access_locator, uploaded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, 'LOCAL', 0, ?, ?)
             ON CONFLICT(owner_id, fingerprint) DO NOTHING
             RETURNING {FILE_COLUMNS}"
        );

        let inserted = sqlx::query_as::<_, FileObject>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.owner_id)
            .bind(&new.fingerprint)
            .bind(&new.original_name)
            .bind(new.size_bytes)
            .bind(&new.content_type)
            .bind(&new.object_key)
            .bind(&new.access_locator)
            .bind(Utc::now())
            .fetch_optional(&self.db)
            .await?;

        if let Some(file) = inserted {
            return Ok(InsertOutcome::Inserted(file));
        }

        debug!(
            owner_id = %new.owner_id,
            fingerprint = %new.fingerprint,
            "insert lost to existing row"
        );
        self.find_by_fingerprint(&new.owner_id, &new.fingerprint)
            .await?
            .map(InsertOutcome::Existing)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "file for owner `{}` with fingerprint `{}`",
                    new.owner_id, new.fingerprint
                ))
            })
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<FileObject>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn find_by_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &str,
    ) -> EngineResult<Option<FileObject>> {
        let sql =
            format!("SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ? AND fingerprint = ?");
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(owner_id)
            .bind(fingerprint)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn find_by_object_key(&self, object_key: &str) -> EngineResult<Option<FileObject>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE object_key = ?");
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(object_key)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn list_by_owner(&self, owner_id: &str) -> EngineResult<Vec<FileObject>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ? ORDER BY uploaded_at DESC"
        );
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(owner_id)
            .fetch_all(&self.db)
            .await?)
    }

    async fn list_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: Option<u32>,
    ) -> EngineResult<Vec<FileObject>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE (tier = 'LOCAL'
                    OR (tier = 'SYNCING' AND julianday(lease_expires_at) <= julianday(?)))
               AND (? IS NULL OR sync_attempts < ?)
             ORDER BY uploaded_at ASC"
        );
        let max_attempts = max_attempts.map(i64::from);
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(now)
            .bind(max_attempts)
            .bind(max_attempts)
            .fetch_all(&self.db)
            .await?)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        lease_owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<Option<FileObject>> {
        let sql = format!(
            "UPDATE files
             SET sync_attempts = sync_attempts + CASE WHEN tier = 'SYNCING' THEN 1 ELSE 0 END,
                 tier = 'SYNCING', lease_owner = ?, lease_expires_at = ?
             WHERE id = ?
               AND (tier = 'LOCAL'
                    OR (tier = 'SYNCING' AND julianday(lease_expires_at) <= julianday(?)))
             RETURNING {FILE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(lease_owner)
            .bind(expires_at)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn commit(
        &self,
        id: Uuid,
        lease_owner: &str,
        now: DateTime<Utc>,
        access_locator: &str,
    ) -> EngineResult<Option<FileObject>> {
        let sql = format!(
            "UPDATE files
             SET tier = 'REMOTE', access_locator = ?, synced_at = ?,
                 lease_owner = NULL, lease_expires_at = NULL,
                 last_error = NULL, sync_attempts = 0
             WHERE id = ? AND tier = 'SYNCING' AND lease_owner = ?
               AND julianday(lease_expires_at) > julianday(?)
             RETURNING {FILE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(access_locator)
            .bind(now)
            .bind(id)
            .bind(lease_owner)
            .bind(now)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn revert(
        &self,
        id: Uuid,
        lease_owner: &str,
        error: &str,
    ) -> EngineResult<Option<FileObject>> {
        let sql = format!(
            "UPDATE files
             SET tier = 'LOCAL', lease_owner = NULL, lease_expires_at = NULL,
                 sync_attempts = sync_attempts + 1, last_error = ?
             WHERE id = ? AND tier = 'SYNCING' AND lease_owner = ?
             RETURNING {FILE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, FileObject>(&sql)
            .bind(error)
            .bind(id)
            .bind(lease_owner)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn record_access(
        &self,
        file_id: Uuid,
        owner_id: &str,
        action: AccessAction,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO file_access_log (file_id, owner_id, action, accessed_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(owner_id)
        .bind(action)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn usage_summary(&self, owner_id: &str, top: u32) -> EngineResult<UsageSummary> {
        let mut summary = UsageSummary::default();

        let by_tier = sqlx::query_as::<_, (Tier, i64, i64)>(
            "SELECT tier, COUNT(*), COALESCE(SUM(size_bytes), 0)
             FROM files WHERE owner_id = ? GROUP BY tier",
        )
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;
        for (tier, files, bytes) in by_tier {
            summary.add_tier(tier, files, bytes);
        }

        summary.total_downloads = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM file_access_log WHERE owner_id = ? AND action = ?",
        )
        .bind(owner_id)
        .bind(AccessAction::Download)
        .fetch_one(&self.db)
        .await?;

        summary.most_accessed = sqlx::query_as::<_, AccessCount>(
            "SELECT f.id AS file_id, f.original_name AS original_name, COUNT(*) AS accesses
             FROM file_access_log l JOIN files f ON f.id = l.file_id
             WHERE f.owner_id = ?
             GROUP BY f.id, f.original_name
             ORDER BY accesses DESC, f.original_name ASC
             LIMIT ?",
        )
        .bind(owner_id)
        .bind(i64::from(top))
        .fetch_all(&self.db)
        .await?;

        Ok(summary)
    }

    async fn storage_breakdown(&self, owner_id: &str) -> EngineResult<Vec<CategoryUsage>> {
        Ok(sqlx::query_as::<_, CategoryUsage>(
            "SELECT CASE WHEN instr(content_type, '/') > 0
                         THEN substr(content_type, 1, instr(content_type, '/') - 1)
                         ELSE content_type END AS category,
                    COUNT(*) AS files,
                    COALESCE(SUM(size_bytes), 0) AS bytes
             FROM files WHERE owner_id = ?
             GROUP BY category
             ORDER BY bytes DESC, category ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn ping(&self) -> EngineResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.db)
            .await?;
        Ok(())
    }
}
