use super::{ApiResponse, json_body, ok, parse_backup_id};
use crate::{
    errors::{AppError, ServiceError},
    models::EventArchiveState,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use bytes::Bytes;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub backup_id: Option<String>,
}

/// `POST /events/{id}/archive {backupId}`
pub async fn archive_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<EventArchiveState>>, AppError> {
    let request: ArchiveRequest = json_body(&body)?;
    let raw_id = request
        .backup_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ServiceError::Validation("backupId is required".into()))?;
    let backup_id = parse_backup_id(&raw_id)?;
    let archived = state.archive.archive_event(&event_id, backup_id).await?;
    Ok(ok(archived))
}

/// `GET /events/{id}/archive`
pub async fn get_archive_state(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<ApiResponse<EventArchiveState>>, AppError> {
    Ok(ok(state.archive.get_state(&event_id).await?))
}

/// `DELETE /events/{id}/archive`
pub async fn unarchive_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<ApiResponse<EventArchiveState>>, AppError> {
    Ok(ok(state.archive.unarchive_event(&event_id).await?))
}
