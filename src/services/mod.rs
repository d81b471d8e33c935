//! The tiered-storage engine.
//!
//! - `fingerprint`: streaming SHA-256 used as the dedup key
//! - `metadata`: `MetadataStore` contract and its SQLite implementation
//! - `ingest`: upload path into the Fast tier
//! - `access`: fresh-on-read locator resolution
//! - `transfer`: per-file claim/copy/verify/commit/revert
//! - `sync_runner`: batches eligible files through transfer workers

pub mod access;
pub mod fingerprint;
pub mod ingest;
pub mod metadata;
pub mod sync_runner;
pub mod transfer;

pub use access::AccessResolver;
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use ingest::{IngestCoordinator, IngestRequest};
pub use metadata::{InsertOutcome, MetadataStore, SqliteMetadataStore};
pub use sync_runner::{SyncConfig, SyncRunner};
pub use transfer::{TransferPolicy, TransferWorker};
