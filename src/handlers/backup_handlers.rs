//! Event backup endpoints.
//!
//! - `POST /events/{id}/backup` starts a job and answers immediately with it
//! - `GET  /events/{id}/backup?backupId=` returns one job or every job of the event

use super::{ApiQuery, ApiResponse, json_body, ok, parse_backup_id};
use crate::{
    errors::{AppError, ServiceError},
    models::BackupJob,
    services::backup_orchestrator::BackupOptions,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupQuery {
    pub backup_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BackupLookup {
    One(BackupJob),
    All(Vec<BackupJob>),
}

pub async fn start_backup(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let options: BackupOptions = json_body(&body)?;
    let job = state.orchestrator.spawn_backup(&event_id, options).await?;
    Ok((StatusCode::ACCEPTED, ok(job)))
}

pub async fn get_backup(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    ApiQuery(query): ApiQuery<BackupQuery>,
) -> Result<Json<ApiResponse<BackupLookup>>, AppError> {
    let Some(raw_id) = query.backup_id.filter(|id| !id.trim().is_empty()) else {
        let jobs = state.jobs.get_by_event(&event_id).await?;
        return Ok(ok(BackupLookup::All(jobs)));
    };

    let backup_id = parse_backup_id(&raw_id)?;
    match state.jobs.get(backup_id).await? {
        Some(job) if job.event_id == event_id => Ok(ok(BackupLookup::One(job))),
        _ => Err(ServiceError::NotFound(format!("backup {backup_id} for event `{event_id}`")).into()),
    }
}
