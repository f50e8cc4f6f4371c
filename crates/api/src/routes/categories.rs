//! Category endpoints. Each mutation is one saga.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Category, CategoryAggregate, CategoryPatch, EntityId};

use crate::AppState;
use crate::error::ApiError;

/// POST /categories
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CategoryAggregate>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let category = req.into_category()?;
    let cancel = state.shutdown.child_token();
    let created = state
        .categories
        .create(category, &cancel)
        .await
        .into_result()?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /categories/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Category>, ApiError> {
    let category = state.categories.get(&EntityId::from(id)).await?;
    Ok(Json(category))
}

/// PATCH /categories/{id}
#[tracing::instrument(skip(state, patch))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<CategoryPatch>,
) -> Result<Json<Category>, ApiError> {
    let cancel = state.shutdown.child_token();
    let updated = state
        .categories
        .update(&EntityId::from(id), |current| patch.apply(current), &cancel)
        .await
        .into_result()?;
    Ok(Json(updated))
}

/// DELETE /categories/{id}
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cancel = state.shutdown.child_token();
    state
        .categories
        .delete(&EntityId::from(id), &cancel)
        .await
        .into_result()?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /categories/{id}/restore
#[tracing::instrument(skip(state))]
pub async fn restore(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cancel = state.shutdown.child_token();
    state
        .categories
        .restore(&EntityId::from(id), &cancel)
        .await
        .into_result()?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /categories/{id}/permanent
#[tracing::instrument(skip(state))]
pub async fn hard_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cancel = state.shutdown.child_token();
    state
        .categories
        .hard_delete(&EntityId::from(id), &cancel)
        .await
        .into_result()?;
    Ok(StatusCode::NO_CONTENT)
}
