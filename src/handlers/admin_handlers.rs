//! Operator endpoints under `/admin`.

use super::{ApiQuery, ApiResponse, json_body, ok};
use crate::{
    errors::{AppError, ServiceError},
    models::{ObjectInfo, ObjectMeta, Tier, TierDecision},
    services::{
        reporter::{BackupSummary, StorageInfo},
        tier_selector::SpaceReport,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    /// Age in days.
    pub max_age: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub removed: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSelectionRequest {
    pub file_size: Option<u64>,
    pub event_id: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub is_homepage: bool,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub is_featured: bool,
    pub compression_quality: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSelectionResponse {
    #[serde(flatten)]
    pub decision: TierDecision,
    pub has_space: SpaceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /admin/backup/status`
pub async fn backup_status(State(state): State<AppState>) -> Result<Json<ApiResponse<BackupSummary>>, AppError> {
    Ok(ok(state.reporter.backup_summary().await?))
}

/// `DELETE /admin/backup/status?maxAge=<days>`
pub async fn cleanup_backups(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CleanupQuery>,
) -> Result<Json<ApiResponse<CleanupResult>>, AppError> {
    let days = query.max_age.unwrap_or(state.default_retention_days);
    if days < 0 {
        return Err(ServiceError::Validation("maxAge must not be negative".into()).into());
    }
    let max_age = chrono::Duration::try_days(days)
        .ok_or_else(|| ServiceError::Validation(format!("maxAge of {days} days is out of range")))?;
    let removed = state.jobs.cleanup_older_than(max_age).await?;
    Ok(ok(CleanupResult { removed }))
}

/// `GET /admin/storage/info`. Always 200; see [`StorageInfo::fallback`].
pub async fn storage_info(State(state): State<AppState>) -> Json<ApiResponse<StorageInfo>> {
    ok(state.reporter.storage_info().await)
}

/// `POST /admin/storage/tier-selection`
pub async fn tier_selection(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ApiResponse<TierSelectionResponse>>, AppError> {
    let request: TierSelectionRequest = json_body(&body)?;
    let meta = ObjectMeta {
        size_bytes: request.file_size,
        content_type: request.content_type,
        is_homepage: request.is_homepage,
        is_featured: request.is_featured,
        is_premium: request.is_premium,
        compression_quality: request.compression_quality,
    };
    let decision = state.selector.select_tier(&meta)?;
    let has_space = state.selector.space_report(request.file_size.unwrap_or_default());
    Ok(ok(TierSelectionResponse {
        decision,
        has_space,
        event_id: request.event_id,
    }))
}

/// `GET /admin/storage/{tier}/objects?prefix=&limit=`
pub async fn list_objects(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<ApiResponse<Vec<ObjectInfo>>>, AppError> {
    let tier: Tier = tier.parse().map_err(ServiceError::Validation)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let objects = state
        .backends
        .get(tier)
        .list(query.prefix.as_deref().unwrap_or(""), limit)
        .await
        .map_err(ServiceError::from)?;
    Ok(ok(objects))
}
