//! Represents a stored photo payload.

use super::{from_millis, tier::Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identifies one stored photo on one backend.
///
/// Records are immutable: re-uploading a photo writes a new record with a
/// new `id` rather than updating the existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObjectRef {
    /// Unique identifier of this stored copy.
    pub id: Uuid,

    /// Event the photo belongs to.
    pub event_id: String,

    /// Photo identifier as known by the event catalog.
    pub photo_id: String,

    /// Backend holding the payload.
    pub backend: Tier,

    /// Key of the payload on `backend`.
    pub remote_key: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MIME type, if known.
    pub content_type: Option<String>,

    /// When the payload was written.
    pub uploaded_at: DateTime<Utc>,
}

/// Row layout of the `storage_objects` table.
#[derive(Debug, FromRow)]
pub(crate) struct StorageObjectRow {
    pub id: Uuid,
    pub event_id: String,
    pub photo_id: String,
    pub backend: String,
    pub remote_key: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub uploaded_at: i64,
}

impl TryFrom<StorageObjectRow> for StorageObjectRef {
    type Error = String;

    fn try_from(row: StorageObjectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            photo_id: row.photo_id,
            backend: row.backend.parse()?,
            remote_key: row.remote_key,
            size_bytes: row.size_bytes.max(0) as u64,
            content_type: row.content_type,
            uploaded_at: from_millis(row.uploaded_at),
        })
    }
}
