//! App endpoint integration tests, including the batch fleet scenarios.

mod common;

use axum::http::StatusCode;
use common::{get_json, post_json, post_multipart, spawn_app, wait_for_task, TestApp};
use serde_json::json;

/// Uploads a small APK and returns its id.
async fn upload_test_app(app: &TestApp, package: &str, version: &str) -> i64 {
    let (status, body) = post_multipart(
        &app.router,
        "/apps/upload",
        "example.apk",
        b"PK\x03\x04 fake apk bytes",
        &[
            ("name", "Example"),
            ("packageName", package),
            ("version", version),
            ("appType", "user"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "upload failed: {body}");
    body["id"].as_i64().unwrap()
}

async fn create_device(app: &TestApp, name: &str, address: &str, group_id: i64) {
    let (status, body) = post_json(
        &app.router,
        "/devices/create",
        json!({"name": name, "deviceId": address, "groupId": group_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "device create failed: {body}");
}

async fn create_group(app: &TestApp, name: &str) -> i64 {
    let (status, body) = post_json(
        &app.router,
        "/groups/create",
        json!({"name": name, "description": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn upload_and_list_apps() {
    let app = spawn_app().await;
    upload_test_app(&app, "com.example.app", "1.0").await;

    let (status, listed) = get_json(&app.router, "/apps/list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["list"][0]["packageName"], "com.example.app");
    assert_eq!(listed["list"][0]["appType"], "user");
}

#[tokio::test]
async fn duplicate_package_version_conflicts() {
    let app = spawn_app().await;
    upload_test_app(&app, "com.example.app", "1.0").await;

    let (status, body) = post_multipart(
        &app.router,
        "/apps/upload",
        "example.apk",
        b"different bytes entirely",
        &[
            ("name", "Example"),
            ("packageName", "com.example.app"),
            ("version", "1.0"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "body: {body}");
}

#[tokio::test]
async fn upload_rejects_non_apk() {
    let app = spawn_app().await;
    let (status, _) = post_multipart(
        &app.router,
        "/apps/upload",
        "notes.txt",
        b"hello",
        &[
            ("name", "x"),
            ("packageName", "com.x"),
            ("version", "1"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sync_install_requires_known_device() {
    let app = spawn_app().await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;

    let (status, _) = post_json(
        &app.router,
        "/apps/install",
        json!({"id": app_id, "deviceId": "unknown:5555"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_install_returns_adb_output() {
    let app = spawn_app().await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;
    create_device(&app, "d1", "10.0.0.1:5555", 0).await;
    app.adb.on_ok("install -r", "Success\n");

    let (status, body) = post_json(
        &app.router,
        "/apps/install",
        json!({"id": app_id, "deviceId": "10.0.0.1:5555"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "Success");
}

/// Batch install across a group with one succeeding and one failing device.
#[tokio::test]
async fn batch_install_aggregates_mixed_results() {
    let app = spawn_app().await;
    let group_id = create_group(&app, "g1").await;
    create_device(&app, "d1", "10.0.0.1:5555", group_id).await;
    create_device(&app, "d2", "10.0.0.2:5555", group_id).await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;

    app.adb.on_ok("-s 10.0.0.1:5555 install", "Success\n");
    app.adb.on_fail(
        "-s 10.0.0.2:5555 install",
        "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]",
    );

    let (status, accepted) = post_json(
        &app.router,
        "/apps/batch-install",
        json!({"id": app_id, "groupId": group_id, "maxWorker": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {accepted}");
    assert_eq!(accepted["total"], 2);
    assert_eq!(accepted["deviceIds"].as_array().unwrap().len(), 2);

    let task = wait_for_task(&app.router, accepted["taskId"].as_str().unwrap()).await;
    assert_eq!(task["status"], "complete");
    assert_eq!(task["total"], 2);
    assert_eq!(task["completed"], 1);
    assert_eq!(task["failed"], 1);

    let results = task["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let ok = results
        .iter()
        .find(|r| r["deviceId"] == "10.0.0.1:5555")
        .unwrap();
    assert_eq!(ok["status"], "complete");
    assert_eq!(ok["message"], "Success");

    let failed = results
        .iter()
        .find(|r| r["deviceId"] == "10.0.0.2:5555")
        .unwrap();
    assert_eq!(failed["status"], "failed");
    assert!(failed["message"]
        .as_str()
        .unwrap()
        .contains("INSTALL_FAILED_INSUFFICIENT_STORAGE"));
}

/// An over-limit maxWorker is clamped, not rejected.
#[tokio::test]
async fn batch_install_clamps_oversized_max_worker() {
    let app = spawn_app().await;
    let group_id = create_group(&app, "g1").await;
    create_device(&app, "d1", "10.0.0.1:5555", group_id).await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;
    app.adb.on_ok("install -r", "Success\n");

    let (status, accepted) = post_json(
        &app.router,
        "/apps/batch-install",
        json!({"id": app_id, "groupId": group_id, "maxWorker": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let task = wait_for_task(&app.router, accepted["taskId"].as_str().unwrap()).await;
    assert_eq!(task["status"], "complete");
    assert_eq!(task["completed"], 1);
}

#[tokio::test]
async fn batch_install_over_empty_group_completes_immediately() {
    let app = spawn_app().await;
    let group_id = create_group(&app, "empty").await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;

    let (status, accepted) = post_json(
        &app.router,
        "/apps/batch-install",
        json!({"id": app_id, "groupId": group_id, "maxWorker": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["total"], 0);

    let task = wait_for_task(&app.router, accepted["taskId"].as_str().unwrap()).await;
    assert_eq!(task["status"], "complete");
    assert_eq!(task["total"], 0);
}

#[tokio::test]
async fn batch_uninstall_by_devices_uses_package_name() {
    let app = spawn_app().await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;
    app.adb.on_ok("uninstall com.example.app", "Success\n");

    let (status, accepted) = post_json(
        &app.router,
        "/apps/batch-uninstall-by-devices",
        json!({"id": app_id, "deviceIds": ["10.0.0.1:5555"], "maxWorker": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let task = wait_for_task(&app.router, accepted["taskId"].as_str().unwrap()).await;
    assert_eq!(task["status"], "complete");
    assert_eq!(task["completed"], 1);
    assert_eq!(app.adb.calls_matching("uninstall com.example.app"), 1);
}

#[tokio::test]
async fn batch_stop_by_devices_force_stops() {
    let app = spawn_app().await;
    let app_id = upload_test_app(&app, "com.example.app", "1.0").await;
    app.adb.on_ok("am force-stop com.example.app", "");

    let (status, accepted) = post_json(
        &app.router,
        "/apps/batch-stop-by-devices",
        json!({"id": app_id, "deviceIds": ["10.0.0.1:5555"], "maxWorker": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let task = wait_for_task(&app.router, accepted["taskId"].as_str().unwrap()).await;
    assert_eq!(task["status"], "complete");
    assert_eq!(app.adb.calls_matching("am force-stop com.example.app"), 1);
}

#[tokio::test]
async fn batch_against_unknown_app_is_not_found() {
    let app = spawn_app().await;
    let (status, _) = post_json(
        &app.router,
        "/apps/batch-install",
        json!({"id": 12345, "groupId": 0, "maxWorker": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_task_id_is_not_found() {
    let app = spawn_app().await;
    let (status, _) = get_json(&app.router, "/apps/batch-task-status?taskId=missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
