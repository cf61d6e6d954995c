//! HTTP handlers. Successful responses share the `{success, data}` envelope;
//! failures are rendered by [`AppError`](crate::errors::AppError).

pub mod admin_handlers;
pub mod archive_handlers;
pub mod backup_handlers;
pub mod health_handlers;
pub mod photo_handlers;

use crate::errors::{AppError, ServiceError};
use axum::{
    Json,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

/// Query string extractor whose rejections use the error envelope.
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ServiceError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Decode an optional JSON body; an empty body yields `T::default()`.
pub(crate) fn json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::from(ServiceError::Validation(format!("invalid JSON body: {err}"))))
}

pub(crate) fn parse_backup_id(raw: &str) -> Result<Uuid, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::from(ServiceError::Validation(format!("invalid backupId `{raw}`"))))
}
