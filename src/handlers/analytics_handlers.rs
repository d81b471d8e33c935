//! Per-owner usage reports built from the metadata store.

use crate::{
    errors::AppError,
    handlers::file_handlers::owner_id,
    models::{CategoryUsage, UsageSummary},
    state::AppState,
};
use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;

/// Files listed under `mostAccessed` in the summary.
const MOST_ACCESSED: u32 = 5;

#[derive(Debug, Serialize)]
pub struct StorageBreakdownResponse {
    pub categories: Vec<CategoryUsage>,
}

/// `GET /analytics/summary`: the caller's file counts and bytes per tier.
pub async fn usage_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageSummary>, AppError> {
    let owner_id = owner_id(&headers)?;
    let summary = state.metadata.usage_summary(&owner_id, MOST_ACCESSED).await?;
    Ok(Json(summary))
}

/// `GET /analytics/storage-breakdown`: the caller's usage by content-type category.
pub async fn storage_breakdown(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StorageBreakdownResponse>, AppError> {
    let owner_id = owner_id(&headers)?;
    let categories = state.metadata.storage_breakdown(&owner_id).await?;
    Ok(Json(StorageBreakdownResponse { categories }))
}
