//! Blob endpoints. Clients address blobs by service and root id; the
//! service-prefixed storage id never leaves the server.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use domain::{Blob, BlobAggregate, ValidationError};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct UploadBlobRequest {
    #[serde(default)]
    pub blob_type: String,
    #[serde(default)]
    pub extension: String,
    /// Declared size in bytes. Accepted as a JSON number or string.
    #[serde(default)]
    pub size: serde_json::Value,
    /// Base64 payload.
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct BlobResponse {
    pub id: String,
    pub service: String,
    pub name: String,
    pub size: i64,
    pub blob_type: String,
    pub extension: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Blob> for BlobResponse {
    fn from(blob: Blob) -> Self {
        Self {
            id: blob.root_id().to_string(),
            service: blob.service.clone(),
            name: blob.name,
            size: blob.size,
            blob_type: blob.blob_type,
            extension: blob.extension,
            url: blob.url,
            created_at: blob.created_at,
            updated_at: blob.updated_at,
        }
    }
}

fn size_field(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// POST /blobs/{service}/{id}
#[tracing::instrument(skip(state, req))]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
    Json(req): Json<UploadBlobRequest>,
) -> Result<Json<BlobResponse>, ApiError> {
    let blob = BlobAggregate {
        root_id: id,
        service,
        blob_type: req.blob_type,
        extension: req.extension,
        size: size_field(req.size),
    }
    .into_blob(&state.location)?;

    let content = STANDARD
        .decode(req.content.as_bytes())
        .map_err(|_| ValidationError::format("content", "base64"))?;

    let cancel = state.shutdown.child_token();
    let stored = state
        .blobs
        .upload(blob, content, &cancel)
        .await
        .into_result()?;
    Ok(Json(stored.into()))
}

/// GET /blobs/{service}/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<BlobResponse>, ApiError> {
    let blob = state.blobs.get_blob(&service, &id).await?;
    Ok(Json(blob.into()))
}

/// DELETE /blobs/{service}/{id}
#[tracing::instrument(skip(state))]
pub async fn erase(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let cancel = state.shutdown.child_token();
    state
        .blobs
        .erase(&service, &id, &cancel)
        .await
        .into_result()?;
    Ok(StatusCode::NO_CONTENT)
}
