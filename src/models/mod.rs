//! Core data models for tiered photo storage and event backups.
//!
//! Persisted entities map to SQLite rows through small `*Row` structs
//! (timestamps are stored as epoch milliseconds) and serialize as camelCase
//! JSON for the HTTP surface.

pub mod archive;
pub mod backend;
pub mod backup_job;
pub mod storage_object;
pub mod tier;

pub use archive::EventArchiveState;
pub use backend::{BackendDescriptor, BackendStatus, ObjectInfo};
pub use backup_job::{BackupFailure, BackupJob, BackupStatus};
pub use storage_object::StorageObjectRef;
pub use tier::{ObjectMeta, Priority, Tier, TierDecision};

use chrono::{DateTime, TimeZone, Utc};

/// Convert epoch milliseconds read from SQLite back into a UTC timestamp.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
