//! Core data models for the tiered storage engine.
//!
//! `FileObject` maps to the `files` table via `sqlx::FromRow` and serializes
//! as JSON via `serde`. `analytics` holds the access log and usage reports.

pub mod analytics;
pub mod file_object;
pub mod sync;

pub use analytics::{AccessAction, AccessCount, CategoryUsage, TierUsage, UsageSummary};
pub use file_object::{FileObject, IngestOutcome, NewFileObject, Tier};
pub use sync::{SyncSummary, TransferOutcome};
