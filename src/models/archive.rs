//! Archive state attached to an event.

use super::from_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Archive fields of an event record.
///
/// Access control elsewhere reads `is_archived` to decide whether the event
/// is read-only. Unarchiving clears `is_archived`/`archived_at` but keeps
/// `backup_id` and `archive_backend_url` as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventArchiveState {
    pub event_id: String,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub backup_id: Option<Uuid>,
    pub archive_backend_url: Option<String>,
}

impl EventArchiveState {
    /// State of an event that has never been archived.
    pub fn unarchived(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            is_archived: false,
            archived_at: None,
            backup_id: None,
            archive_backend_url: None,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct EventArchiveRow {
    pub event_id: String,
    pub is_archived: bool,
    pub archived_at: Option<i64>,
    pub backup_id: Option<Uuid>,
    pub archive_backend_url: Option<String>,
}

impl From<EventArchiveRow> for EventArchiveState {
    fn from(row: EventArchiveRow) -> Self {
        Self {
            event_id: row.event_id,
            is_archived: row.is_archived,
            archived_at: row.archived_at.map(from_millis),
            backup_id: row.backup_id,
            archive_backend_url: row.archive_backend_url,
        }
    }
}
