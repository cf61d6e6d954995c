//! Backup job record and its state machine.
//!
//! ```text
//! initializing ──begin──▶ backing_up ──finish──▶ completed | failed
//!      └──────────────────fail───────────────────────────────▶ failed
//! ```
//!
//! A job reaches a terminal status at most once; every transition out of a
//! terminal status is rejected with [`InvalidTransition`].

use super::from_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Initializing,
    BackingUp,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Initializing => "initializing",
            BackupStatus::BackingUp => "backing_up",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(BackupStatus::Initializing),
            "backing_up" => Ok(BackupStatus::BackingUp),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(format!("unknown backup status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("backup job cannot move from `{from}` to `{to}`")]
pub struct InvalidTransition {
    pub from: BackupStatus,
    pub to: BackupStatus,
}

/// A photo that could not be copied, with enough detail to retry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFailure {
    pub photo_id: String,
    pub reason: String,
}

/// One orchestrated copy of an event's photos to the secondary backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub id: Uuid,
    pub event_id: String,
    pub status: BackupStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_photos: u32,
    /// Photos present on the backup target, including skipped ones.
    pub successful_uploads: u32,
    pub failed_uploads: u32,
    /// Subset of `successful_uploads` that were already copied by an
    /// earlier run and needed no write.
    pub skipped_uploads: u32,
    pub bytes_copied: u64,
    pub errors: Vec<BackupFailure>,
    /// Job-level failure reason (for failures not tied to a photo).
    pub message: Option<String>,
    /// Whether the event is archived once the job completes.
    pub archive_requested: bool,
}

impl BackupJob {
    pub fn new(event_id: impl Into<String>, archive_requested: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event_id.into(),
            status: BackupStatus::Initializing,
            start_time: Utc::now(),
            end_time: None,
            total_photos: 0,
            successful_uploads: 0,
            failed_uploads: 0,
            skipped_uploads: 0,
            bytes_copied: 0,
            errors: Vec::new(),
            message: None,
            archive_requested,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn processed(&self) -> u32 {
        self.successful_uploads + self.failed_uploads
    }

    /// Fraction of photos that failed; 0 for an empty job.
    pub fn failure_ratio(&self) -> f64 {
        if self.total_photos == 0 {
            return 0.0;
        }
        f64::from(self.failed_uploads) / f64::from(self.total_photos)
    }

    /// Photos enumerated; start copying.
    pub fn begin(&mut self, total_photos: u32) -> Result<(), InvalidTransition> {
        self.transition(BackupStatus::Initializing, BackupStatus::BackingUp)?;
        self.total_photos = total_photos;
        Ok(())
    }

    /// Count a photo present on the target. Returns `false` (and counts
    /// nothing) if every photo has already been accounted for.
    pub fn record_success(&mut self, bytes: u64, skipped: bool) -> bool {
        if self.status != BackupStatus::BackingUp || self.processed() >= self.total_photos {
            return false;
        }
        self.successful_uploads += 1;
        if skipped {
            self.skipped_uploads += 1;
        } else {
            self.bytes_copied += bytes;
        }
        true
    }

    /// Count a photo that could not be copied after retries.
    pub fn record_failure(&mut self, photo_id: impl Into<String>, reason: impl Into<String>) -> bool {
        if self.status != BackupStatus::BackingUp || self.processed() >= self.total_photos {
            return false;
        }
        self.failed_uploads += 1;
        self.errors.push(BackupFailure {
            photo_id: photo_id.into(),
            reason: reason.into(),
        });
        true
    }

    /// Compute the terminal status once every photo has resolved.
    ///
    /// The job fails when the failure ratio exceeds `failure_threshold`;
    /// otherwise it completes, possibly with a non-empty `errors` list.
    pub fn finish(&mut self, failure_threshold: f64) -> Result<BackupStatus, InvalidTransition> {
        let to = if self.failure_ratio() > failure_threshold {
            BackupStatus::Failed
        } else {
            BackupStatus::Completed
        };
        self.transition(BackupStatus::BackingUp, to)?;
        self.end_time = Some(Utc::now());
        Ok(to)
    }

    /// Fail the job outright from any non-terminal status.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() {
            return Err(InvalidTransition {
                from: self.status,
                to: BackupStatus::Failed,
            });
        }
        self.status = BackupStatus::Failed;
        self.message = Some(message.into());
        self.end_time = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, from: BackupStatus, to: BackupStatus) -> Result<(), InvalidTransition> {
        if self.status != from {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Row layout of the `backup_jobs` table.
#[derive(Debug, FromRow)]
pub(crate) struct BackupJobRow {
    pub id: Uuid,
    pub event_id: String,
    pub status: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub total_photos: i64,
    pub successful_uploads: i64,
    pub failed_uploads: i64,
    pub skipped_uploads: i64,
    pub bytes_copied: i64,
    pub errors: String,
    pub message: Option<String>,
    pub archive_requested: bool,
}

impl TryFrom<BackupJobRow> for BackupJob {
    type Error = String;

    fn try_from(row: BackupJobRow) -> Result<Self, Self::Error> {
        let errors: Vec<BackupFailure> = serde_json::from_str(&row.errors)
            .map_err(|err| format!("backup job {} has malformed errors: {err}", row.id))?;
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            status: row.status.parse()?,
            start_time: from_millis(row.start_time),
            end_time: row.end_time.map(from_millis),
            total_photos: row.total_photos.max(0) as u32,
            successful_uploads: row.successful_uploads.max(0) as u32,
            failed_uploads: row.failed_uploads.max(0) as u32,
            skipped_uploads: row.skipped_uploads.max(0) as u32,
            bytes_copied: row.bytes_copied.max(0) as u64,
            errors,
            message: row.message,
            archive_requested: row.archive_requested,
        })
    }
}
