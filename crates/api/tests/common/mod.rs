//! Common test utilities for integration tests.
//!
//! Tests run the real router against in-memory SQLite, with ADB replaced by
//! a scripted executor so device behaviour is deterministic.
#![allow(dead_code)] // Not every test binary uses every helper.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use devicefarm_api::app::{create_app, AppState};
use devicefarm_api::config::Config;
use shared::adb::{AdbBridge, AdbError, AdbExecutor, CommandOutput};
use tower::ServiceExt;

/// Executor that answers adb invocations from substring-matched rules and
/// records every call.
pub struct ScriptedAdb {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdb {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// First matching rule wins; unmatched calls succeed with empty output.
    pub fn on(&self, pattern: &str, output: CommandOutput) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), output));
    }

    pub fn on_ok(&self, pattern: &str, stdout: &str) {
        self.on(pattern, ok_output(stdout));
    }

    pub fn on_fail(&self, pattern: &str, stdout: &str) {
        self.on(
            pattern,
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(1),
            },
        );
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.contains(needle))
            .count()
    }
}

pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

#[async_trait]
impl AdbExecutor for ScriptedAdb {
    async fn exec(&self, args: &[String]) -> Result<CommandOutput, AdbError> {
        let joined = args.join(" ");
        self.calls.lock().unwrap().push(joined.clone());
        let rules = self.rules.lock().unwrap();
        for (pattern, output) in rules.iter() {
            if joined.contains(pattern) {
                return Ok(output.clone());
            }
        }
        Ok(ok_output(""))
    }

    async fn spawn_detached(&self, args: &[String]) -> Result<(), AdbError> {
        self.calls.lock().unwrap().push(args.join(" "));
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub adb: Arc<ScriptedAdb>,
    #[allow(dead_code)] // Keeps the storage root alive for the test duration.
    pub storage: tempfile::TempDir,
}

/// Builds the application against a fresh in-memory database.
pub async fn spawn_app() -> TestApp {
    let storage = tempfile::tempdir().expect("tempdir");
    let config = Config::for_tests(&storage.path().to_string_lossy());

    let pool = persistence::db::create_test_pool().await;

    let adb = Arc::new(ScriptedAdb::new());
    let state = AppState::new(config, pool, AdbBridge::new(adb.clone()));
    let router = create_app(state.clone());

    TestApp {
        router,
        state,
        adb,
        storage,
    }
}

/// Sends a GET and returns (status, parsed JSON body).
pub async fn get_json(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(path)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    split_response(response).await
}

/// Sends a JSON POST and returns (status, parsed JSON body).
pub async fn post_json(
    router: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    split_response(response).await
}

/// Sends a multipart POST with one file field plus extra text fields.
pub async fn post_multipart(
    router: &Router,
    path: &str,
    file_name: &str,
    file_bytes: &[u8],
    fields: &[(&str, &str)],
) -> (StatusCode, serde_json::Value) {
    const BOUNDARY: &str = "df-test-boundary";

    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");
    split_response(response).await
}

async fn split_response(
    response: axum::response::Response,
) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// Polls the task-status endpoint until the task reaches a terminal state.
pub async fn wait_for_task(router: &Router, task_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let (status, body) = get_json(router, &format!("/apps/batch-task-status?taskId={task_id}")).await;
        assert_eq!(status, StatusCode::OK, "task status query failed: {body}");
        if body["status"] == "complete" || body["status"] == "failed" {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never completed");
}
