//! Defines the HTTP surface of the service.
//!
//! ## Structure
//! - **Event endpoints**
//!   - `POST   /events/{id}/backup`: start a backup job
//!   - `GET    /events/{id}/backup`: job by `backupId`, or all jobs of the event
//!   - `POST   /events/{id}/archive`: archive against a completed backup
//!   - `GET    /events/{id}/archive`: archive state
//!   - `DELETE /events/{id}/archive`: unarchive
//!   - `PUT    /events/{id}/photos/{photoId}`: upload a photo payload
//!   - `GET    /events/{id}/photos`: stored photos of the event
//!
//! - **Admin endpoints**
//!   - `GET    /admin/backup/status`: backup summary
//!   - `DELETE /admin/backup/status`: remove old terminal jobs
//!   - `GET    /admin/storage/info`: per-backend capacity
//!   - `POST   /admin/storage/tier-selection`: dry-run tier selection
//!   - `GET    /admin/storage/{tier}/objects`: list a backend

use crate::{
    handlers::{
        admin_handlers::{backup_status, cleanup_backups, list_objects, storage_info, tier_selection},
        archive_handlers::{archive_event, get_archive_state, unarchive_event},
        backup_handlers::{get_backup, start_backup},
        health_handlers::{healthz, readyz},
        photo_handlers::{list_photos, upload_photo},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Largest accepted photo payload.
const MAX_PHOTO_BYTES: usize = 256 * 1024 * 1024;

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Event routes
        .route("/events/{id}/backup", post(start_backup).get(get_backup))
        .route(
            "/events/{id}/archive",
            post(archive_event)
                .get(get_archive_state)
                .delete(unarchive_event),
        )
        .route(
            "/events/{id}/photos/{photo_id}",
            put(upload_photo).layer(DefaultBodyLimit::max(MAX_PHOTO_BYTES)),
        )
        .route("/events/{id}/photos", get(list_photos))
        // Admin routes
        .route(
            "/admin/backup/status",
            get(backup_status).delete(cleanup_backups),
        )
        .route("/admin/storage/info", get(storage_info))
        .route("/admin/storage/tier-selection", post(tier_selection))
        .route("/admin/storage/{tier}/objects", get(list_objects))
}
