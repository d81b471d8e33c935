//! HTTP handlers for uploads, file listings, and downloads.
//!
//! Upload bodies are streamed straight into the ingest path. The caller's
//! identity arrives in the `x-owner-id` header, set by whatever
//! authenticated the request upstream.

use crate::{
    errors::{AppError, EngineError},
    models::{AccessAction, FileObject, Tier},
    services::IngestRequest,
    state::AppState,
    stores::ByteStream,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt, channel::mpsc};
use serde::{Deserialize, Serialize};
use std::io;
use tracing::warn;
use uuid::Uuid;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Query params carried by a signed Fast-tier locator.
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileObject>,
}

pub(crate) fn owner_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("missing x-owner-id header"))
}

/// `POST /files/{filename}`: upload a file body.
///
/// 201 for new content, 200 when the owner already had identical bytes.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let owner_id = owner_id(&headers)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();

    let outcome = state
        .ingest
        .ingest(IngestRequest {
            owner_id,
            filename,
            content_type,
            declared_size,
            body: stream,
        })
        .await?;

    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)).into_response())
}

/// `POST /files`: multipart/form-data upload of the first file field.
///
/// The field is forwarded chunk by chunk, so size limits are enforced by
/// ingest rather than by buffering the form.
pub async fn upload_multipart(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let owner_id = owner_id(&headers)?;

    let mut field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?
        {
            Some(field) if field.file_name().is_some() => break field,
            Some(_) => continue,
            None => return Err(AppError::bad_request("no file field in form")),
        }
    };
    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(|v| v.to_string());

    let (mut tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
    let forward = async move {
        loop {
            let item = match field.chunk().await {
                Ok(Some(chunk)) => Ok(chunk),
                Ok(None) => break,
                Err(err) => Err(io::Error::other(err.body_text())),
            };
            let failed = item.is_err();
            // receiver gone means ingest already stopped reading
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    };
    let ingest = state.ingest.ingest(IngestRequest {
        owner_id,
        filename,
        content_type,
        declared_size: None,
        body: rx.boxed(),
    });

    let ((), outcome) = tokio::join!(forward, ingest);
    let outcome = outcome?;
    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)).into_response())
}

/// `GET /files`: the caller's files, newest first, with fresh locators.
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FileListResponse>, AppError> {
    let owner_id = owner_id(&headers)?;
    let mut files = Vec::new();
    for file in state.metadata.list_by_owner(&owner_id).await? {
        files.push(state.access.with_fresh_locator(file).await?);
    }
    Ok(Json(FileListResponse { files }))
}

/// The caller's file `id`. Other owners' files look exactly like missing ones.
async fn owned_file(state: &AppState, id: Uuid, owner_id: &str) -> Result<FileObject, AppError> {
    state
        .metadata
        .get(id)
        .await?
        .filter(|file| file.owner_id == owner_id)
        .ok_or_else(|| AppError::not_found("file not found"))
}

/// Log an access event. Analytics never block a read.
async fn record_access(state: &AppState, file: &FileObject, action: AccessAction) {
    if let Err(err) = state
        .metadata
        .record_access(file.id, &file.owner_id, action, Utc::now())
        .await
    {
        warn!(file_id = %file.id, ?action, "failed to record access: {}", err);
    }
}

/// Stream `body` with the file's content type and an inline disposition.
fn object_response(body: ByteStream, content_type: &str, filename: Option<&str>) -> Response {
    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(name) = filename {
        let name = name.replace(['"', '\\'], "_");
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", name)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}

/// `GET /files/{id}`: one of the caller's files.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<FileObject>, AppError> {
    let owner_id = owner_id(&headers)?;
    let file = owned_file(&state, id, &owner_id).await?;
    record_access(&state, &file, AccessAction::View).await;
    Ok(Json(state.access.with_fresh_locator(file).await?))
}

/// `GET /files/{id}/download`: the caller's file content.
///
/// `LOCAL` and `SYNCING` files are streamed from the Fast tier. `REMOTE`
/// files redirect to a fresh Durable locator.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let owner_id = owner_id(&headers)?;
    let file = owned_file(&state, id, &owner_id).await?;
    record_access(&state, &file, AccessAction::Download).await;

    match file.tier {
        Tier::Remote => {
            let locator = state.access.resolve(&file).await?;
            Ok(Redirect::temporary(&locator).into_response())
        }
        Tier::Local | Tier::Syncing => {
            let body = state
                .fast
                .get(&file.object_key)
                .await
                .map_err(EngineError::from)?;
            Ok(object_response(body, &file.content_type, Some(&file.original_name)))
        }
    }
}

/// `GET /objects/{*key}?expires=..&signature=..`: stream a Fast-tier object
/// addressed by a signed locator.
pub async fn download_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    let signer = state
        .signer
        .as_ref()
        .ok_or_else(|| AppError::not_found("signed downloads are not enabled"))?;
    if !signer.verify(&key, q.expires, &q.signature, Utc::now()) {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "locator signature invalid or expired",
        ));
    }

    let content_type = state
        .metadata
        .find_by_object_key(&key)
        .await?
        .map(|file| file.content_type);
    let body = state.fast.get(&key).await.map_err(EngineError::from)?;
    Ok(object_response(
        body,
        content_type.as_deref().unwrap_or("application/octet-stream"),
        None,
    ))
}
