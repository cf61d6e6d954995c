//! Photo upload and listing.

use super::{ApiQuery, ApiResponse, ok};
use crate::{
    errors::AppError,
    models::{ObjectMeta, StorageObjectRef, TierDecision},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    #[serde(default)]
    pub is_homepage: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_premium: bool,
    pub compression_quality: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct StoredPhoto {
    pub object: StorageObjectRef,
    pub decision: TierDecision,
}

/// `PUT /events/{id}/photos/{photoId}` with the raw payload as body.
pub async fn upload_photo(
    State(state): State<AppState>,
    Path((event_id, photo_id)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let meta = ObjectMeta {
        size_bytes: Some(body.len() as u64),
        content_type,
        is_homepage: query.is_homepage,
        is_featured: query.is_featured,
        is_premium: query.is_premium,
        compression_quality: query.compression_quality,
    };
    let (object, decision) = state
        .placement
        .store_photo(&event_id, Some(&photo_id), meta, body)
        .await?;
    Ok((StatusCode::CREATED, ok(StoredPhoto { object, decision })))
}

/// `GET /events/{id}/photos`
pub async fn list_photos(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<StorageObjectRef>>>, AppError> {
    Ok(ok(state.placement.list_event_photos(&event_id).await?))
}
