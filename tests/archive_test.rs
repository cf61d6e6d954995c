mod common;

use common::test_env;
use event_vault::{
    errors::ServiceError,
    models::{BackupJob, BackupStatus},
};
use uuid::Uuid;

fn job_in(event_id: &str, status: BackupStatus) -> BackupJob {
    let mut job = BackupJob::new(event_id, false);
    match status {
        BackupStatus::Initializing => {}
        BackupStatus::BackingUp => job.begin(3).unwrap(),
        BackupStatus::Completed => {
            job.begin(0).unwrap();
            job.finish(0.1).unwrap();
        }
        BackupStatus::Failed => job.fail("enumeration failed").unwrap(),
    }
    job
}

#[tokio::test]
async fn archiving_requires_a_completed_backup() {
    let env = test_env().await;
    for status in [
        BackupStatus::Initializing,
        BackupStatus::BackingUp,
        BackupStatus::Failed,
    ] {
        let job = job_in("e1", status);
        env.state.jobs.save(&job).await.unwrap();
        let err = env
            .state
            .archive
            .archive_event("e1", job.id)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::PreconditionFailed(_)),
            "{status} should not allow archiving, got {err:?}"
        );
    }
    assert!(!env.state.archive.get_state("e1").await.unwrap().is_archived);
}

#[tokio::test]
async fn unknown_or_foreign_backups_are_rejected() {
    let env = test_env().await;
    let err = env
        .state
        .archive
        .archive_event("e1", Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));

    let other = job_in("e2", BackupStatus::Completed);
    env.state.jobs.save(&other).await.unwrap();
    let err = env
        .state
        .archive
        .archive_event("e1", other.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));
}

#[tokio::test]
async fn archive_then_unarchive_keeps_backup_reference() {
    let env = test_env().await;
    let job = job_in("e1", BackupStatus::Completed);
    env.state.jobs.save(&job).await.unwrap();

    let archived = env.state.archive.archive_event("e1", job.id).await.unwrap();
    assert!(archived.is_archived);
    assert!(archived.archived_at.is_some());
    assert_eq!(archived.backup_id, Some(job.id));

    let reloaded = env.state.archive.get_state("e1").await.unwrap();
    assert!(reloaded.is_archived);
    assert_eq!(reloaded.archive_backend_url, archived.archive_backend_url);

    let unarchived = env.state.archive.unarchive_event("e1").await.unwrap();
    assert!(!unarchived.is_archived);
    assert!(unarchived.archived_at.is_none());
    assert_eq!(unarchived.backup_id, Some(job.id));
    assert_eq!(unarchived.archive_backend_url, archived.archive_backend_url);
}

#[tokio::test]
async fn never_archived_event_has_default_state() {
    let env = test_env().await;
    let state = env.state.archive.get_state("fresh").await.unwrap();
    assert!(!state.is_archived);
    assert!(state.backup_id.is_none());

    let state = env.state.archive.unarchive_event("fresh").await.unwrap();
    assert!(!state.is_archived);
}
