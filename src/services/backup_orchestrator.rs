//! Event backup jobs.
//!
//! A job enumerates the event's photos from the catalog, copies each one to
//! the archive backend at `{prefix}/{eventId}/{photoId}` with bounded
//! concurrency, and persists progress after every photo. Because the remote
//! key only depends on the event and photo, re-running a backup after an
//! interruption skips everything already copied.

use crate::{
    config::BackupSettings,
    errors::{ServiceError, ServiceResult},
    models::{BackupJob, BackupStatus, StorageObjectRef},
    services::{
        archive_lifecycle::ArchiveLifecycle, backends::BackendRegistry, placement::PhotoCatalog,
        status_store::StatusStore,
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Caller options for a backup request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    /// Quality recorded in the manifest, in `(0, 1]`.
    pub compression_quality: Option<f32>,
    /// Write `_manifest.json` next to the copies once the job completes.
    #[serde(default)]
    pub include_metadata: bool,
    /// Archive the event once the job completes.
    #[serde(default)]
    pub archive: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    event_id: &'a str,
    backup_id: Uuid,
    created_at: chrono::DateTime<Utc>,
    compression_quality: Option<f32>,
    photos: Vec<ManifestEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry<'a> {
    photo_id: &'a str,
    key: String,
    size_bytes: u64,
    content_type: Option<&'a str>,
}

/// File name of the backup manifest. Photo ids may not start with `_`, so
/// it never collides with a photo copy.
pub const MANIFEST_NAME: &str = "_manifest.json";

type ActiveJobs = Arc<Mutex<HashMap<String, Uuid>>>;

/// Releases the event's slot in the active-job registry when dropped.
pub struct ActiveJobGuard {
    registry: ActiveJobs,
    event_id: String,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        let mut active = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.event_id);
    }
}

/// Outcome of copying a single photo.
enum PhotoCopy {
    Copied(u64),
    AlreadyPresent,
}

#[derive(Clone)]
pub struct BackupOrchestrator {
    catalog: Arc<dyn PhotoCatalog>,
    backends: BackendRegistry,
    jobs: Arc<StatusStore>,
    archive: ArchiveLifecycle,
    settings: BackupSettings,
    active: ActiveJobs,
}

impl BackupOrchestrator {
    pub fn new(
        catalog: Arc<dyn PhotoCatalog>,
        backends: BackendRegistry,
        jobs: Arc<StatusStore>,
        archive: ArchiveLifecycle,
        settings: BackupSettings,
    ) -> Self {
        Self {
            catalog,
            backends,
            jobs,
            archive,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Id of the job currently running for the event in this process.
    pub fn active_job(&self, event_id: &str) -> Option<Uuid> {
        self.lock_active().get(event_id).copied()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, Uuid>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register and persist a new `initializing` job for the event.
    pub async fn begin(&self, event_id: &str, options: &BackupOptions) -> ServiceResult<(BackupJob, ActiveJobGuard)> {
        if event_id.trim().is_empty() {
            return Err(ServiceError::Validation("event id is required".into()));
        }
        if let Some(quality) = options.compression_quality {
            if !(quality > 0.0 && quality <= 1.0) {
                return Err(ServiceError::Validation(format!(
                    "compression quality {quality} must be in (0, 1]"
                )));
            }
        }

        let job = BackupJob::new(event_id, options.archive);
        {
            let mut active = self.lock_active();
            if let Some(job_id) = active.get(event_id) {
                return Err(ServiceError::JobInProgress {
                    event_id: event_id.to_string(),
                    job_id: *job_id,
                });
            }
            active.insert(event_id.to_string(), job.id);
        }
        let guard = ActiveJobGuard {
            registry: self.active.clone(),
            event_id: event_id.to_string(),
        };

        self.jobs.save(&job).await?;
        info!(event_id, job_id = %job.id, archive = options.archive, "backup job created");
        Ok((job, guard))
    }

    /// Start a backup in the background and return the `initializing` job.
    pub async fn spawn_backup(&self, event_id: &str, options: BackupOptions) -> ServiceResult<BackupJob> {
        let (job, guard) = self.begin(event_id, &options).await?;
        let initial = job.clone();
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let job_id = job.id;
            if let Err(err) = this.execute(job, &options).await {
                error!(%job_id, error = %err, "backup job aborted");
            }
        });
        Ok(initial)
    }

    /// Run a backup to completion on the current task.
    pub async fn run_backup(&self, event_id: &str, options: BackupOptions) -> ServiceResult<BackupJob> {
        let (job, _guard) = self.begin(event_id, &options).await?;
        self.execute(job, &options).await
    }

    /// Drive the job to a terminal status. If any step fails, the job is
    /// still left `failed` in the store rather than looking active.
    async fn execute(&self, mut job: BackupJob, options: &BackupOptions) -> ServiceResult<BackupJob> {
        match self.process(&mut job, options).await {
            Ok(()) => Ok(job),
            Err(err) => {
                self.abandon(&mut job, &err).await;
                Err(err)
            }
        }
    }

    async fn process(&self, job: &mut BackupJob, options: &BackupOptions) -> ServiceResult<()> {
        let photos = match timeout(
            self.settings.enumeration_timeout,
            self.catalog.list_event_photos(&job.event_id),
        )
        .await
        {
            Ok(Ok(photos)) => photos,
            Ok(Err(err)) => return self.fail_job(job, format!("photo enumeration failed: {err}")).await,
            Err(_) => {
                let reason = format!(
                    "photo enumeration timed out after {:?}",
                    self.settings.enumeration_timeout
                );
                return self.fail_job(job, reason).await;
            }
        };

        job.begin(photos.len() as u32)?;
        self.jobs.save(job).await?;
        info!(job_id = %job.id, event_id = %job.event_id, total = photos.len(), "backup started");

        let total = photos.len();
        let event_id = job.event_id.clone();
        let mut copies = stream::iter(photos.into_iter().map(|photo| {
            let this = self.clone();
            let event_id = event_id.clone();
            async move {
                let outcome = this.copy_photo(&event_id, &photo).await;
                (photo, outcome)
            }
        }))
        .buffer_unordered(self.settings.concurrency.max(1));

        let mut copied = Vec::with_capacity(total);
        while let Some((photo, outcome)) = copies.next().await {
            match outcome {
                Ok(PhotoCopy::Copied(bytes)) => {
                    job.record_success(bytes, false);
                    copied.push(photo);
                }
                Ok(PhotoCopy::AlreadyPresent) => {
                    job.record_success(0, true);
                    copied.push(photo);
                }
                Err(reason) => {
                    warn!(job_id = %job.id, photo_id = %photo.photo_id, %reason, "photo backup failed");
                    job.record_failure(&photo.photo_id, reason);
                }
            }
            if let Err(err) = self.jobs.save(job).await {
                warn!(job_id = %job.id, error = %err, "could not persist backup progress");
            }
        }

        let status = job.finish(self.settings.failure_threshold)?;
        if status == BackupStatus::Completed && options.include_metadata {
            if let Err(err) = self.write_manifest(job, &copied, options).await {
                warn!(job_id = %job.id, error = %err, "could not write backup manifest");
            }
        }
        self.jobs.save(job).await?;
        info!(
            job_id = %job.id,
            event_id = %job.event_id,
            status = %job.status,
            successful = job.successful_uploads,
            skipped = job.skipped_uploads,
            failed = job.failed_uploads,
            bytes = job.bytes_copied,
            "backup finished"
        );

        if status == BackupStatus::Completed && job.archive_requested {
            if let Err(err) = self.archive.archive_event(&job.event_id, job.id).await {
                error!(job_id = %job.id, error = %err, "archiving after backup failed");
            }
        }
        Ok(())
    }

    async fn fail_job(&self, job: &mut BackupJob, reason: String) -> ServiceResult<()> {
        error!(job_id = %job.id, event_id = %job.event_id, %reason, "backup failed");
        job.fail(reason)?;
        self.jobs.save(job).await
    }

    /// Best-effort final write after an aborted run. A job that already
    /// reached a terminal status in memory is saved as is.
    async fn abandon(&self, job: &mut BackupJob, cause: &ServiceError) {
        if job.is_active() {
            // Cannot fail: the job is not terminal.
            let _ = job.fail(format!("backup aborted: {cause}"));
        }
        if let Err(err) = self.jobs.save(job).await {
            error!(job_id = %job.id, error = %err, "could not persist aborted backup job");
        }
    }

    fn backup_key(&self, event_id: &str, photo_id: &str) -> String {
        format!("{}/{}/{}", self.settings.key_prefix, event_id, photo_id)
    }

    /// Copy one photo to the archive backend unless an identical-size copy
    /// is already there. Errors are flattened to a reason for the job log.
    async fn copy_photo(&self, event_id: &str, photo: &StorageObjectRef) -> Result<PhotoCopy, String> {
        let target = self.backends.archive();
        let key = self.backup_key(event_id, &photo.photo_id);

        match target.head(&key).await {
            Ok(Some(existing)) if existing.size_bytes == photo.size_bytes => {
                return Ok(PhotoCopy::AlreadyPresent);
            }
            Ok(_) => {}
            Err(err) => return Err(err.to_string()),
        }

        let data = self
            .backends
            .get(photo.backend)
            .get(&photo.remote_key)
            .await
            .map_err(|err| format!("reading source copy: {err}"))?;
        let size = data.len() as u64;
        target
            .put(&key, data, photo.content_type.as_deref())
            .await
            .map_err(|err| err.to_string())?;
        Ok(PhotoCopy::Copied(size))
    }

    async fn write_manifest(
        &self,
        job: &BackupJob,
        photos: &[StorageObjectRef],
        options: &BackupOptions,
    ) -> ServiceResult<()> {
        let mut entries: Vec<ManifestEntry<'_>> = photos
            .iter()
            .map(|photo| ManifestEntry {
                photo_id: &photo.photo_id,
                key: self.backup_key(&job.event_id, &photo.photo_id),
                size_bytes: photo.size_bytes,
                content_type: photo.content_type.as_deref(),
            })
            .collect();
        entries.sort_by(|a, b| a.photo_id.cmp(b.photo_id));

        let manifest = Manifest {
            event_id: &job.event_id,
            backup_id: job.id,
            created_at: Utc::now(),
            compression_quality: options.compression_quality,
            photos: entries,
        };
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| ServiceError::Internal(format!("encoding manifest: {err}")))?;
        let key = self.backup_key(&job.event_id, MANIFEST_NAME);
        self.backends
            .archive()
            .put(&key, Bytes::from(body), Some("application/json"))
            .await?;
        Ok(())
    }
}
