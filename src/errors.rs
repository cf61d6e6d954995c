use crate::{models::backup_job::InvalidTransition, services::backends::BackendError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io, sync::OnceLock};
use thiserror::Error;
use uuid::Uuid;

static DEVELOPMENT_MODE: OnceLock<bool> = OnceLock::new();

/// Enable or disable internal error details in HTTP responses.
///
/// Only the first call has an effect; the flag is set once at startup.
pub fn set_development_mode(enabled: bool) {
    let _ = DEVELOPMENT_MODE.set(enabled);
}

fn development_mode() -> bool {
    DEVELOPMENT_MODE.get().copied().unwrap_or(false)
}

/// Errors raised by the storage and backup services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad caller input.
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    /// A backend kept failing after retries (network, auth, timeout).
    #[error("backend `{backend}` unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },
    /// Every tier that could take the object rejected it for capacity.
    #[error("backend `{backend}` rejected the write: quota exceeded")]
    QuotaExceeded { backend: String },
    #[error("a backup job ({job_id}) is already running for event `{event_id}`")]
    JobInProgress { event_id: String, job_id: Uuid },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidKey(key) => ServiceError::Validation(format!("invalid object key `{key}`")),
            BackendError::NotFound { key, .. } => ServiceError::NotFound(format!("object `{key}`")),
            BackendError::QuotaExceeded { backend, .. } => ServiceError::QuotaExceeded { backend },
            BackendError::Unavailable { backend, reason } => {
                ServiceError::BackendUnavailable { backend, reason }
            }
            BackendError::Timeout { backend, after } => ServiceError::BackendUnavailable {
                backend,
                reason: format!("timed out after {after:?}"),
            },
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Internal detail, only rendered in development mode.
    pub details: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "message": self.message,
            "status": self.status.as_u16()
        });
        if development_mode() {
            if let Some(details) = self.details {
                body["details"] = json!(details);
            }
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::JobInProgress { .. } => StatusCode::CONFLICT,
            ServiceError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::QuotaExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
            ServiceError::PreconditionFailed(_)
            | ServiceError::InvalidTransition(_)
            | ServiceError::Database(_)
            | ServiceError::Io(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match err {
            ServiceError::Database(_) | ServiceError::Io(_) | ServiceError::Internal(_) => {
                tracing::error!(error = %err, "request failed with internal error");
                AppError::new(status, "internal server error").with_details(format!("{err:?}"))
            }
            other => AppError::new(status, other.to_string()).with_details(format!("{other:?}")),
        }
    }
}
