//! Background upkeep: periodic quota refresh and job retention.

use crate::{
    config::MaintenanceSettings,
    services::{backends::BackendRegistry, status_store::StatusStore},
};
use std::sync::Arc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Maintenance {
    backends: BackendRegistry,
    jobs: Arc<StatusStore>,
    settings: MaintenanceSettings,
}

impl Maintenance {
    pub fn new(backends: BackendRegistry, jobs: Arc<StatusStore>, settings: MaintenanceSettings) -> Self {
        Self {
            backends,
            jobs,
            settings,
        }
    }

    /// Refresh every backend's usage; failures leave last known values.
    pub async fn refresh_quotas(&self) {
        for adapter in self.backends.all() {
            match adapter.refresh_usage().await {
                Ok(used) => debug!(tier = %adapter.tier(), used, "backend usage refreshed"),
                Err(err) => warn!(tier = %adapter.tier(), error = %err, "backend usage refresh failed"),
            }
        }
    }

    /// Drop terminal jobs past the retention period.
    pub async fn cleanup_jobs(&self) {
        let Some(max_age) = chrono::Duration::try_days(self.settings.job_retention_days) else {
            warn!(days = self.settings.job_retention_days, "job retention out of range; cleanup skipped");
            return;
        };
        if let Err(err) = self.jobs.cleanup_older_than(max_age).await {
            warn!(error = %err, "backup job cleanup failed");
        }
    }

    /// Run both tasks on their intervals until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut refresh = tokio::time::interval(self.settings.quota_refresh_interval);
            let mut cleanup = tokio::time::interval(self.settings.cleanup_interval);
            refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("maintenance loop stopped");
                        break;
                    }
                    _ = refresh.tick() => self.refresh_quotas().await,
                    _ = cleanup.tick() => self.cleanup_jobs().await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::{BackupJob, Tier},
        services::{
            backends::{BackendAdapter, RemoteBackend, RetryPolicy},
            quota_tracker::QuotaTracker,
        },
    };
    use bytes::Bytes;
    use std::time::Duration;

    async fn maintenance() -> (Maintenance, Arc<QuotaTracker>, BackendRegistry) {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        db::migrate(&pool).await.unwrap();
        let quota = Arc::new(QuotaTracker::new(
            Tier::ALL.map(|tier| (tier, 1_000_000)),
            0.05,
        ));
        let adapter = |tier: Tier| {
            Arc::new(BackendAdapter::new(
                tier,
                Arc::new(RemoteBackend::in_memory(tier.as_str(), "https://store.test")),
                RetryPolicy::default(),
                quota.clone(),
            ))
        };
        let backends = BackendRegistry::new(
            adapter(Tier::Primary),
            adapter(Tier::Secondary),
            adapter(Tier::Local),
        );
        let settings = MaintenanceSettings {
            quota_refresh_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            job_retention_days: 7,
            stats_timeout: Duration::from_secs(1),
        };
        let jobs = Arc::new(StatusStore::new(pool, 16));
        (
            Maintenance::new(backends.clone(), jobs, settings),
            quota,
            backends,
        )
    }

    #[tokio::test]
    async fn refresh_replaces_drifted_usage() {
        let (maintenance, quota, backends) = maintenance().await;
        backends
            .get(Tier::Primary)
            .put("photos/e1/a", Bytes::from_static(b"12345"), None)
            .await
            .unwrap();
        quota.record_usage(Tier::Primary, 10_000);

        maintenance.refresh_quotas().await;
        let primary = quota.snapshot(Tier::Primary).unwrap();
        assert_eq!(primary.used_bytes, 5);
        assert!(primary.last_refreshed_at.is_some());
    }

    #[tokio::test]
    async fn cleanup_uses_configured_retention() {
        let (maintenance, _, _) = maintenance().await;
        let mut old = BackupJob::new("e1", false);
        old.start_time -= chrono::Duration::days(8);
        old.fail("source unreachable").unwrap();
        maintenance.jobs.save(&old).await.unwrap();

        maintenance.cleanup_jobs().await;
        assert!(maintenance.jobs.get(old.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn loop_stops_on_cancellation() {
        let (maintenance, _, _) = maintenance().await;
        let token = CancellationToken::new();
        let handle = maintenance.spawn(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
