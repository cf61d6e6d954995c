//! Persistent backup job records.
//!
//! SQLite is the single source of truth. A bounded LRU cache sits in front
//! of `get`; every write goes through to the table before the cache is
//! updated, and cleanup drops the whole cache.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::{
        BackupJob, BackupStatus,
        backup_job::BackupJobRow,
    },
};
use chrono::{Duration, Utc};
use lru::LruCache;
use sqlx::SqlitePool;
use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
};
use tracing::{info, warn};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, event_id, status, start_time, end_time, total_photos, \
     successful_uploads, failed_uploads, skipped_uploads, bytes_copied, errors, message, \
     archive_requested";

const INTERRUPTED_MESSAGE: &str = "interrupted: service restarted while the job was running";

pub struct StatusStore {
    db: SqlitePool,
    cache: Mutex<LruCache<Uuid, BackupJob>>,
}

impl StatusStore {
    pub fn new(db: SqlitePool, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<Uuid, BackupJob>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upsert a full snapshot of the job.
    pub async fn save(&self, job: &BackupJob) -> ServiceResult<()> {
        let errors = serde_json::to_string(&job.errors)
            .map_err(|err| ServiceError::Internal(format!("encoding job errors: {err}")))?;
        sqlx::query(
            "INSERT INTO backup_jobs (
                id, event_id, status, start_time, end_time, total_photos, successful_uploads,
                failed_uploads, skipped_uploads, bytes_copied, errors, message, archive_requested
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                end_time = excluded.end_time,
                total_photos = excluded.total_photos,
                successful_uploads = excluded.successful_uploads,
                failed_uploads = excluded.failed_uploads,
                skipped_uploads = excluded.skipped_uploads,
                bytes_copied = excluded.bytes_copied,
                errors = excluded.errors,
                message = excluded.message",
        )
        .bind(job.id)
        .bind(&job.event_id)
        .bind(job.status.as_str())
        .bind(job.start_time.timestamp_millis())
        .bind(job.end_time.map(|t| t.timestamp_millis()))
        .bind(i64::from(job.total_photos))
        .bind(i64::from(job.successful_uploads))
        .bind(i64::from(job.failed_uploads))
        .bind(i64::from(job.skipped_uploads))
        .bind(job.bytes_copied as i64)
        .bind(errors)
        .bind(&job.message)
        .bind(job.archive_requested)
        .execute(&self.db)
        .await?;

        self.cache().put(job.id, job.clone());
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<BackupJob>> {
        let cached = self.cache().get(&id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let row = sqlx::query_as::<_, BackupJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM backup_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let job = BackupJob::try_from(row).map_err(ServiceError::Internal)?;
        self.cache().put(id, job.clone());
        Ok(Some(job))
    }

    /// Every job, newest first.
    pub async fn get_all(&self) -> ServiceResult<Vec<BackupJob>> {
        self.fetch(
            &format!("SELECT {JOB_COLUMNS} FROM backup_jobs ORDER BY start_time DESC, id"),
            None,
        )
        .await
    }

    /// Jobs of one event, newest first.
    pub async fn get_by_event(&self, event_id: &str) -> ServiceResult<Vec<BackupJob>> {
        self.fetch(
            &format!(
                "SELECT {JOB_COLUMNS} FROM backup_jobs WHERE event_id = ? \
                 ORDER BY start_time DESC, id"
            ),
            Some(event_id),
        )
        .await
    }

    pub async fn recent(&self, limit: usize) -> ServiceResult<Vec<BackupJob>> {
        let rows = sqlx::query_as::<_, BackupJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM backup_jobs ORDER BY start_time DESC, id LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        decode(rows)
    }

    /// Remove terminal jobs that started more than `max_age` ago. Active
    /// jobs are never removed. Returns the number of deleted records.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> ServiceResult<u64> {
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .ok_or_else(|| {
                ServiceError::Validation(format!("max age of {} days is out of range", max_age.num_days()))
            })?
            .timestamp_millis();
        let result = sqlx::query(
            "DELETE FROM backup_jobs WHERE status IN (?, ?) AND start_time < ?",
        )
        .bind(BackupStatus::Completed.as_str())
        .bind(BackupStatus::Failed.as_str())
        .bind(cutoff)
        .execute(&self.db)
        .await?;

        self.cache().clear();
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, max_age_days = max_age.num_days(), "old backup jobs removed");
        }
        Ok(removed)
    }

    /// Fail jobs a previous process left `initializing` or `backing_up`, so
    /// a new backup request for those events can resume.
    pub async fn recover_interrupted(&self) -> ServiceResult<usize> {
        let rows = sqlx::query_as::<_, BackupJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM backup_jobs WHERE status IN (?, ?)"
        ))
        .bind(BackupStatus::Initializing.as_str())
        .bind(BackupStatus::BackingUp.as_str())
        .fetch_all(&self.db)
        .await?;

        let mut recovered = 0;
        for mut job in decode(rows)? {
            if job.fail(INTERRUPTED_MESSAGE).is_ok() {
                warn!(job_id = %job.id, event_id = %job.event_id, "marking interrupted backup job as failed");
                self.save(&job).await?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn fetch(&self, sql: &str, event_id: Option<&str>) -> ServiceResult<Vec<BackupJob>> {
        let mut query = sqlx::query_as::<_, BackupJobRow>(sql);
        if let Some(event_id) = event_id {
            query = query.bind(event_id);
        }
        let rows = query.fetch_all(&self.db).await?;
        decode(rows)
    }
}

fn decode(rows: Vec<BackupJobRow>) -> ServiceResult<Vec<BackupJob>> {
    rows.into_iter()
        .map(|row| BackupJob::try_from(row).map_err(ServiceError::Internal))
        .collect()
}
