//! Photo ingestion endpoint (/upload)

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    routing::any,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;
use crate::constants::FILES_FIELD;
use crate::multipart::collect_files;
use crate::services::error::{LogErr, Rejection};
use crate::storage::FileMetadata;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/upload", any(upload))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Id of the last file stored.
    pub file_id: String,
    /// Ids of every file stored, in request order.
    pub file_ids: Vec<String>,
    /// Files that were received but could not be stored.
    pub failed: usize,
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// POST /upload - verify the caller, then forward every file part to storage
#[tracing::instrument(skip_all, fields(subject = tracing::field::Empty))]
async fn upload(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, Rejection> {
    if method != Method::POST {
        return Err((StatusCode::NOT_FOUND, "Not found"));
    }
    let started = Instant::now();

    let token = bearer_token(&headers).ok_or_else(|| {
        tracing::warn!("No valid authorization header");
        (StatusCode::UNAUTHORIZED, "Unauthorized")
    })?;
    let identity = state
        .verifier
        .verify(token)
        .await
        .log_status("Token verification failed", StatusCode::UNAUTHORIZED, "Unauthorized")?;
    tracing::Span::current().record("subject", identity.subject.as_str());
    tracing::info!(email = ?identity.email, "Starting file upload");

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let files = collect_files(
        body.into_data_stream(),
        content_type,
        state.max_upload_bytes,
    )
    .await
    .log_500("Error parsing request", "Error parsing request.")?;

    if files.is_empty() {
        tracing::warn!("No file uploaded");
        return Err((StatusCode::BAD_REQUEST, "No file uploaded."));
    }

    let mut file_ids = Vec::with_capacity(files.len());
    let mut failed = 0usize;
    for file in files {
        if file.field != FILES_FIELD {
            tracing::debug!(field = %file.field, "File sent under an unexpected field name");
        }
        let meta = FileMetadata {
            name: file.file_name,
            mime_type: file.mime_type,
            parent_id: state.destination_id.clone(),
        };
        let size = file.bytes.len();
        match state.storage.store(file.bytes, &meta).await {
            Ok(id) => {
                tracing::info!(file = %meta.name, file_id = %id, size, "File uploaded");
                file_ids.push(id);
            }
            Err(e) => {
                tracing::error!(file = %meta.name, error = %e, "Error uploading file");
                failed += 1;
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(stored = file_ids.len(), failed, elapsed_ms, "Upload finished");

    let Some(file_id) = file_ids.last().cloned() else {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "Error uploading file."));
    };
    Ok(Json(UploadResponse {
        file_id,
        file_ids,
        failed,
    }))
}
