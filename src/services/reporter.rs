//! Operator-facing aggregates over backup jobs and backend capacity.

use crate::{
    errors::ServiceResult,
    models::{BackendDescriptor, BackendStatus, BackupJob, BackupStatus, Tier},
    services::{backends::BackendRegistry, quota_tracker::QuotaTracker, status_store::StatusStore},
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::warn;

const RECENT_BACKUPS: usize = 10;

pub const STATS_FALLBACK_MESSAGE: &str = "storage statistics unavailable; showing last known values";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub total_backups: usize,
    pub active_backups: usize,
    pub completed_backups: usize,
    pub failed_backups: usize,
    pub total_photos_backed_up: u64,
    pub total_photos_failed: u64,
    pub total_bytes_backed_up: u64,
    pub recent_backups: Vec<BackupJob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    pub name: Tier,
    pub used: u64,
    pub available: u64,
    pub free: u64,
    pub usage_percentage: f64,
    pub status: BackendStatus,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl From<BackendDescriptor> for BackendInfo {
    fn from(desc: BackendDescriptor) -> Self {
        Self {
            name: desc.name,
            used: desc.used_bytes,
            available: desc.available_bytes,
            free: desc.free_bytes(),
            usage_percentage: desc.usage_percentage(),
            status: desc.status,
            last_refreshed_at: desc.last_refreshed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSummary {
    pub total_used: u64,
    pub total_available: u64,
    pub total_free: u64,
    pub usage_percentage: f64,
}

impl StorageSummary {
    /// Totals saturate at `u64::MAX`.
    pub fn from_backends(backends: &[BackendInfo]) -> Self {
        let total_used = backends.iter().fold(0u64, |acc, b| acc.saturating_add(b.used));
        let total_available = backends
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.available));
        Self {
            total_used,
            total_available,
            total_free: total_available.saturating_sub(total_used),
            usage_percentage: if total_available == 0 {
                0.0
            } else {
                total_used as f64 / total_available as f64 * 100.0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub backends: Vec<BackendInfo>,
    pub summary: StorageSummary,
    /// Set when no backend could be queried and tracked values are shown.
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct Reporter {
    quota: Arc<QuotaTracker>,
    backends: BackendRegistry,
    jobs: Arc<StatusStore>,
    stats_timeout: Duration,
}

impl Reporter {
    pub fn new(
        quota: Arc<QuotaTracker>,
        backends: BackendRegistry,
        jobs: Arc<StatusStore>,
        stats_timeout: Duration,
    ) -> Self {
        Self {
            quota,
            backends,
            jobs,
            stats_timeout,
        }
    }

    pub async fn backup_summary(&self) -> ServiceResult<BackupSummary> {
        let jobs = self.jobs.get_all().await?;
        let count = |status: BackupStatus| jobs.iter().filter(|job| job.status == status).count();
        Ok(BackupSummary {
            total_backups: jobs.len(),
            active_backups: jobs.iter().filter(|job| job.is_active()).count(),
            completed_backups: count(BackupStatus::Completed),
            failed_backups: count(BackupStatus::Failed),
            total_photos_backed_up: jobs.iter().map(|job| u64::from(job.successful_uploads)).sum(),
            total_photos_failed: jobs.iter().map(|job| u64::from(job.failed_uploads)).sum(),
            total_bytes_backed_up: jobs
                .iter()
                .fold(0u64, |acc, job| acc.saturating_add(job.bytes_copied)),
            recent_backups: jobs.into_iter().take(RECENT_BACKUPS).collect(),
        })
    }

    /// Refresh every backend's usage concurrently, then report.
    ///
    /// Never fails: a backend whose statistics cannot be read within the
    /// timeout is reported from tracked values as degraded.
    pub async fn storage_info(&self) -> StorageInfo {
        let refreshes = self.backends.all().map(|adapter| async move {
            let tier = adapter.tier();
            match timeout(self.stats_timeout, adapter.refresh_usage()).await {
                Ok(Ok(_)) => true,
                Ok(Err(_)) => false,
                Err(_) => {
                    warn!(%tier, timeout = ?self.stats_timeout, "storage statistics timed out");
                    self.quota.mark_degraded(tier);
                    false
                }
            }
        });
        let outcomes = join_all(refreshes).await;
        let fallback = !outcomes.iter().any(|ok| *ok);

        let backends: Vec<BackendInfo> = self
            .quota
            .snapshot_all()
            .into_iter()
            .map(BackendInfo::from)
            .collect();
        let summary = StorageSummary::from_backends(&backends);

        StorageInfo {
            backends,
            summary,
            fallback,
            message: fallback.then(|| STATS_FALLBACK_MESSAGE.to_string()),
        }
    }
}
