pub mod archive_lifecycle;
pub mod backends;
pub mod backup_orchestrator;
pub mod maintenance;
pub mod placement;
pub mod quota_tracker;
pub mod reporter;
pub mod status_store;
pub mod tier_selector;
