//! Manual trigger for a sync run.

use crate::{errors::AppError, models::SyncSummary, state::AppState};
use axum::{Json, extract::State};

/// `POST /sync`: run one sync pass and return its summary.
///
/// Per-file failures are reported in the summary; only a metadata store
/// outage turns into an error response.
pub async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncSummary>, AppError> {
    let summary = state.sync.run_sync().await?;
    Ok(Json(summary))
}
