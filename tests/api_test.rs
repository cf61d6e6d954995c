mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::{MB, TestEnv, test_env};
use event_vault::{
    app,
    models::{BackupJob, Tier},
};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

async fn send(env: &TestEnv, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app(env.state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_for_terminal(env: &TestEnv, event_id: &str, backup_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(
            env,
            "GET",
            &format!("/events/{event_id}/backup?backupId={backup_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let job_status = body["data"]["status"].as_str().unwrap().to_string();
        if job_status == "completed" || job_status == "failed" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backup {backup_id} never finished");
}

#[tokio::test]
async fn backup_request_returns_initializing_job_then_completes() {
    let env = test_env().await;
    env.seed_photos("e1", 3).await;

    let (status, body) = send(&env, "POST", "/events/e1/backup", Some(json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "initializing");
    let backup_id = body["data"]["id"].as_str().unwrap().to_string();

    let job = wait_for_terminal(&env, "e1", &backup_id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["successfulUploads"], 3);

    let (status, body) = send(&env, "GET", "/events/e1/backup", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Archive against the finished backup.
    let (status, body) = send(
        &env,
        "POST",
        "/events/e1/archive",
        Some(json!({ "backupId": backup_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isArchived"], true);

    let (status, body) = send(&env, "DELETE", "/events/e1/archive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isArchived"], false);
    assert_eq!(body["data"]["backupId"], backup_id.as_str());
}

#[tokio::test]
async fn backup_lookup_is_scoped_to_the_event() {
    let env = test_env().await;
    let job = env
        .state
        .orchestrator
        .run_backup("e1", Default::default())
        .await
        .unwrap();

    let (status, body) = send(&env, "GET", &format!("/events/e2/backup?backupId={}", job.id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], 404);

    let (status, _) = send(&env, "GET", "/events/e1/backup?backupId=not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn archive_errors_map_to_documented_statuses() {
    let env = test_env().await;
    let (status, body) = send(&env, "POST", "/events/e1/archive", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let mut failed = BackupJob::new("e1", false);
    failed.fail("boom").unwrap();
    env.state.jobs.save(&failed).await.unwrap();
    let (status, body) = send(
        &env,
        "POST",
        "/events/e1/archive",
        Some(json!({ "backupId": failed.id })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn concurrent_backup_request_conflicts() {
    let env = test_env().await;
    let (_job, _guard) = env
        .state
        .orchestrator
        .begin("busy", &Default::default())
        .await
        .unwrap();
    let (status, body) = send(&env, "POST", "/events/busy/backup", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);
}

#[tokio::test]
async fn tier_selection_falls_back_when_primary_is_nearly_full() {
    let env = test_env().await;
    env.state.quota.refresh(Tier::Primary, 96 * MB, 100 * MB);

    let (status, body) = send(
        &env,
        "POST",
        "/admin/storage/tier-selection",
        Some(json!({ "fileSize": 5_000_000, "isHomepage": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tier"], "secondary");
    assert_eq!(body["data"]["priority"], "high");
    assert_eq!(body["data"]["hasSpace"]["primary"], false);
    assert_eq!(body["data"]["hasSpace"]["secondary"], true);

    let (status, _) = send(&env, "POST", "/admin/storage/tier-selection", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn storage_info_falls_back_when_every_stat_hangs() {
    let env = test_env().await;
    for backend in [&env.primary, &env.secondary, &env.local] {
        backend.hang_usage(true);
    }

    let (status, body) = send(&env, "GET", "/admin/storage/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fallback"], true);
    assert_eq!(
        body["data"]["message"],
        "storage statistics unavailable; showing last known values"
    );
    let backends = body["data"]["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 3);
    assert!(backends.iter().all(|b| b["status"] == "degraded"));
}

#[tokio::test]
async fn storage_info_reports_refreshed_usage() {
    let env = test_env().await;
    env.seed_photos("e1", 2).await;

    let (status, body) = send(&env, "GET", "/admin/storage/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fallback"], false);
    assert!(body["data"].get("message").is_none());
    let primary = &body["data"]["backends"][0];
    assert_eq!(primary["name"], "primary");
    assert!(primary["used"].as_u64().unwrap() > 0);
    assert_eq!(primary["status"], "available");
}

#[tokio::test]
async fn photo_upload_and_listing() {
    let env = test_env().await;
    let request = Request::builder()
        .method("PUT")
        .uri("/events/e9/photos/cover?isHomepage=true")
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(vec![7u8; 2048]))
        .unwrap();
    let response = app(env.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["data"]["decision"]["tier"], "primary");
    assert_eq!(body["data"]["object"]["photoId"], "cover");
    assert_eq!(body["data"]["object"]["sizeBytes"], 2048);

    let (status, body) = send(&env, "GET", "/events/e9/photos", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&env, "GET", "/admin/storage/primary/objects?prefix=photos/e9/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(&env, "GET", "/admin/storage/tape/objects", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn backup_status_summary_and_cleanup() {
    let env = test_env().await;
    env.seed_photos("e1", 2).await;
    let mut old = BackupJob::new("e1", false);
    old.start_time = old.start_time - chrono::Duration::days(30);
    old.begin(2).unwrap();
    old.record_success(100, false);
    old.record_success(100, false);
    old.finish(0.1).unwrap();
    env.state.jobs.save(&old).await.unwrap();
    env.state
        .orchestrator
        .run_backup("e1", Default::default())
        .await
        .unwrap();

    let (status, body) = send(&env, "GET", "/admin/backup/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalBackups"], 2);
    assert_eq!(body["data"]["completedBackups"], 2);
    assert_eq!(body["data"]["totalPhotosBackedUp"], 4);
    assert_eq!(body["data"]["recentBackups"].as_array().unwrap().len(), 2);

    let (status, body) = send(&env, "DELETE", "/admin/backup/status?maxAge=7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 1);
}

#[tokio::test]
async fn health_endpoints() {
    let env = test_env().await;
    let (status, body) = send(&env, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&env, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}

#[tokio::test]
async fn out_of_range_max_age_is_a_bad_request() {
    let env = test_env().await;
    for max_age in ["9223372036854775807", "10000000000", "-1"] {
        let (status, body) = send(&env, "DELETE", &format!("/admin/backup/status?maxAge={max_age}"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "maxAge={max_age}");
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], 400);
    }
}

#[tokio::test]
async fn malformed_query_strings_use_the_error_envelope() {
    let env = test_env().await;
    let (status, body) = send(&env, "DELETE", "/admin/backup/status?maxAge=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("maxAge"));

    let (status, body) = send(&env, "GET", "/admin/storage/primary/objects?limit=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let request = Request::builder()
        .method("PUT")
        .uri("/events/e1/photos/cover?isHomepage=maybe")
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(vec![7u8; 16]))
        .unwrap();
    let response = app(env.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn reserved_photo_id_is_rejected() {
    let env = test_env().await;
    let request = Request::builder()
        .method("PUT")
        .uri("/events/e1/photos/_manifest.json")
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(vec![7u8; 16]))
        .unwrap();
    let response = app(env.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(env.primary.put_attempts(), 0);
}
