//! Device endpoint integration tests.

mod common;

use axum::http::StatusCode;
use common::{get_json, post_json, spawn_app};
use serde_json::json;

#[tokio::test]
async fn device_crud_round_trip() {
    let app = spawn_app().await;

    let (status, created) = post_json(
        &app.router,
        "/devices/create",
        json!({"name": "Rack phone", "deviceId": "10.0.0.5:5555"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["deviceId"], "10.0.0.5:5555");
    assert_eq!(created["groupId"], 0);
    let id = created["id"].as_i64().unwrap();

    let (status, listed) = get_json(&app.router, "/devices/list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["list"][0]["name"], "Rack phone");

    let (status, updated) = post_json(
        &app.router,
        "/devices/update",
        json!({"id": id, "name": "Renamed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Renamed");

    let (status, _) = post_json(&app.router, "/devices/delete", json!({"id": id})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = get_json(&app.router, "/devices/list").await;
    assert_eq!(listed["total"], 0);
}

#[tokio::test]
async fn reachable_device_registers_online() {
    let app = spawn_app().await;
    app.adb.on_ok("echo OK", "OK\n");

    let (status, created) = post_json(
        &app.router,
        "/devices/create",
        json!({"name": "Live", "deviceId": "10.0.0.7:5555"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "online");
}

#[tokio::test]
async fn duplicate_device_address_conflicts() {
    let app = spawn_app().await;

    let (status, _) = post_json(
        &app.router,
        "/devices/create",
        json!({"name": "a", "deviceId": "10.0.0.5:5555"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &app.router,
        "/devices/create",
        json!({"name": "b", "deviceId": "10.0.0.5:5555"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn create_rejects_unknown_group() {
    let app = spawn_app().await;

    let (status, _) = post_json(
        &app.router,
        "/devices/create",
        json!({"name": "a", "deviceId": "d1", "groupId": 42}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_missing_device_is_not_found() {
    let app = spawn_app().await;
    let (status, _) = post_json(
        &app.router,
        "/devices/update",
        json!({"id": 999, "name": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_go_home_reports_per_device_outcomes() {
    let app = spawn_app().await;
    app.adb.on_ok("-s good input keyevent 3", "");
    app.adb.on_fail("-s broken input keyevent 3", "error: device offline");

    let (status, body) = post_json(
        &app.router,
        "/devices/batch-go-home",
        json!({"deviceIds": ["good", "broken"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["good"], "");
    assert!(body["results"]["broken"]
        .as_str()
        .unwrap()
        .contains("device offline"));
}

#[tokio::test]
async fn batch_go_home_rejects_oversized_requests() {
    let app = spawn_app().await;
    let devices: Vec<String> = (0..51).map(|i| format!("d{i}")).collect();

    let (status, _) = post_json(
        &app.router,
        "/devices/batch-go-home",
        json!({"deviceIds": devices}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &app.router,
        "/devices/batch-go-home",
        json!({"deviceIds": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_kill_apps_stops_third_party_packages() {
    let app = spawn_app().await;
    app.adb.on_ok(
        "pm list packages -3",
        "package:com.example.game\npackage:io.appium.settings\n",
    );

    let (status, body) = post_json(
        &app.router,
        "/devices/batch-kill-apps",
        json!({"deviceIds": ["dev"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["dev"], "");

    // The protected Appium helper is skipped.
    assert_eq!(app.adb.calls_matching("force-stop com.example.game"), 1);
    assert_eq!(app.adb.calls_matching("force-stop io.appium.settings"), 0);
}
