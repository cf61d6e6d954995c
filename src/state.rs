//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    models::Tier,
    services::{
        archive_lifecycle::ArchiveLifecycle,
        backends::BackendRegistry,
        backup_orchestrator::BackupOrchestrator,
        maintenance::Maintenance,
        placement::{PhotoCatalog, PlacementService, SqlitePhotoCatalog},
        quota_tracker::QuotaTracker,
        reporter::Reporter,
        status_store::StatusStore,
        tier_selector::TierSelector,
    },
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Directory probed by the readiness check.
    pub storage_dir: PathBuf,
    pub quota: Arc<QuotaTracker>,
    pub selector: TierSelector,
    pub backends: BackendRegistry,
    pub placement: PlacementService,
    pub jobs: Arc<StatusStore>,
    pub archive: ArchiveLifecycle,
    pub orchestrator: BackupOrchestrator,
    pub reporter: Reporter,
    /// Retention used when a cleanup request gives no age.
    pub default_retention_days: i64,
}

impl AppState {
    /// Quota tracker seeded with each tier's configured capacity.
    pub fn quota_tracker(cfg: &AppConfig) -> Arc<QuotaTracker> {
        Arc::new(QuotaTracker::new(
            [
                (Tier::Primary, cfg.primary.capacity_bytes),
                (Tier::Secondary, cfg.secondary.capacity_bytes),
                (Tier::Local, cfg.local.capacity_bytes),
            ],
            cfg.quota.safety_margin,
        ))
    }

    /// Build state with backends constructed from configuration.
    pub async fn from_config(cfg: &AppConfig, db: SqlitePool) -> anyhow::Result<Self> {
        let quota = Self::quota_tracker(cfg);
        let backends = BackendRegistry::from_config(cfg, quota.clone()).await?;
        Ok(Self::new(cfg, db, quota, backends))
    }

    /// Wire services around an existing registry and tracker.
    pub fn new(cfg: &AppConfig, db: SqlitePool, quota: Arc<QuotaTracker>, backends: BackendRegistry) -> Self {
        let catalog: Arc<dyn PhotoCatalog> = Arc::new(SqlitePhotoCatalog::new(db.clone()));
        Self::with_catalog(cfg, db, quota, backends, catalog)
    }

    pub fn with_catalog(
        cfg: &AppConfig,
        db: SqlitePool,
        quota: Arc<QuotaTracker>,
        backends: BackendRegistry,
        catalog: Arc<dyn PhotoCatalog>,
    ) -> Self {
        let selector = TierSelector::new(quota.clone(), cfg.tiering.clone());
        let jobs = Arc::new(StatusStore::new(db.clone(), cfg.backup.cache_capacity));
        let archive = ArchiveLifecycle::new(
            db.clone(),
            jobs.clone(),
            backends.archive().clone(),
            cfg.backup.key_prefix.clone(),
        );
        let placement = PlacementService::new(selector.clone(), backends.clone(), catalog.clone());
        let orchestrator = BackupOrchestrator::new(
            catalog,
            backends.clone(),
            jobs.clone(),
            archive.clone(),
            cfg.backup.clone(),
        );
        let reporter = Reporter::new(
            quota.clone(),
            backends.clone(),
            jobs.clone(),
            cfg.maintenance.stats_timeout,
        );

        Self {
            db,
            storage_dir: PathBuf::from(&cfg.storage_dir),
            quota,
            selector,
            backends,
            placement,
            jobs,
            archive,
            orchestrator,
            reporter,
            default_retention_days: cfg.maintenance.job_retention_days,
        }
    }

    pub fn maintenance(&self, cfg: &AppConfig) -> Maintenance {
        Maintenance::new(self.backends.clone(), self.jobs.clone(), cfg.maintenance.clone())
    }
}
