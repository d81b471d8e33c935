//! Defines routes for the upload, listing, download, and sync endpoints.
//!
//! ## Structure
//! - **File endpoints** (caller identified by `x-owner-id`)
//!   - `POST   /files`           : multipart upload
//!   - `POST   /files/{filename}`: upload a raw file body
//!   - `GET    /files`           : list the caller's files
//!   - `GET    /files/{id}`      : one file with a fresh locator
//!   - `GET    /files/{id}/download`: stream from Fast or redirect to Durable
//!   - `GET    /analytics/summary`, `GET /analytics/storage-breakdown`
//!
//! - **Object endpoints**
//!   - `GET    /objects/{*key}`  : signed Fast-tier download
//!
//! - **Operations**
//!   - `POST   /sync`            : run one sync pass
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        analytics_handlers::{storage_breakdown, usage_summary},
        file_handlers::{
            download_file, download_object, get_file, list_files, upload_file, upload_multipart,
        },
        health_handlers::{healthz, readyz},
        sync_handlers::trigger_sync,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router carrying `AppState` to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // ingest enforces the configured max size while streaming
        .route(
            "/files",
            get(list_files)
                .post(upload_multipart)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/files/{name_or_id}", post(upload_file).get(get_file))
        .route("/files/{name_or_id}/download", get(download_file))
        .route("/objects/{*key}", get(download_object))
        .route("/sync", post(trigger_sync))
        .route("/analytics/summary", get(usage_summary))
        .route("/analytics/storage-breakdown", get(storage_breakdown))
}
