//! Archive / unarchive transitions on an event.
//!
//! An event may only be archived against a `completed` backup job of that
//! same event. Unarchiving keeps the backup reference as an audit trail.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::{BackupStatus, EventArchiveState, archive::EventArchiveRow},
    services::{backends::BackendAdapter, status_store::StatusStore},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ArchiveLifecycle {
    db: SqlitePool,
    jobs: Arc<StatusStore>,
    archive: Arc<BackendAdapter>,
    key_prefix: String,
}

impl ArchiveLifecycle {
    pub fn new(
        db: SqlitePool,
        jobs: Arc<StatusStore>,
        archive: Arc<BackendAdapter>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db,
            jobs,
            archive,
            key_prefix: key_prefix.into(),
        }
    }

    /// Mark the event archived, pointing at the backup that secured it.
    pub async fn archive_event(&self, event_id: &str, backup_id: Uuid) -> ServiceResult<EventArchiveState> {
        let job = self.jobs.get(backup_id).await?.ok_or_else(|| {
            ServiceError::PreconditionFailed(format!("backup {backup_id} does not exist"))
        })?;
        if job.event_id != event_id {
            return Err(ServiceError::PreconditionFailed(format!(
                "backup {backup_id} belongs to another event"
            )));
        }
        if job.status != BackupStatus::Completed {
            return Err(ServiceError::PreconditionFailed(format!(
                "backup {backup_id} is {}, not completed",
                job.status
            )));
        }

        let state = EventArchiveState {
            event_id: event_id.to_string(),
            is_archived: true,
            archived_at: Some(Utc::now()),
            backup_id: Some(backup_id),
            archive_backend_url: Some(
                self.archive
                    .url_for(&format!("{}/{}/", self.key_prefix, event_id)),
            ),
        };
        sqlx::query(
            "INSERT INTO event_archive_state (
                event_id, is_archived, archived_at, backup_id, archive_backend_url
             ) VALUES (?, 1, ?, ?, ?)
             ON CONFLICT(event_id) DO UPDATE SET
                is_archived = 1,
                archived_at = excluded.archived_at,
                backup_id = excluded.backup_id,
                archive_backend_url = excluded.archive_backend_url",
        )
        .bind(&state.event_id)
        .bind(state.archived_at.map(|t| t.timestamp_millis()))
        .bind(state.backup_id)
        .bind(&state.archive_backend_url)
        .execute(&self.db)
        .await?;

        info!(event_id, %backup_id, "event archived");
        Ok(state)
    }

    /// Clear the archived flag. Never-archived events are left untouched.
    pub async fn unarchive_event(&self, event_id: &str) -> ServiceResult<EventArchiveState> {
        let result = sqlx::query(
            "UPDATE event_archive_state SET is_archived = 0, archived_at = NULL WHERE event_id = ?",
        )
        .bind(event_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() > 0 {
            info!(event_id, "event unarchived");
        }
        self.get_state(event_id).await
    }

    pub async fn get_state(&self, event_id: &str) -> ServiceResult<EventArchiveState> {
        let row = sqlx::query_as::<_, EventArchiveRow>(
            "SELECT event_id, is_archived, archived_at, backup_id, archive_backend_url
             FROM event_archive_state WHERE event_id = ?",
        )
        .bind(event_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row
            .map(EventArchiveState::from)
            .unwrap_or_else(|| EventArchiveState::unarchived(event_id)))
    }
}
