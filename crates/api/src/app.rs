use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use shared::adb::AdbBridge;
use sqlx::SqlitePool;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::trace_id;
use crate::routes::{apps, devices, files, groups, health, screenshot, stream};
use crate::services::batch::TaskRegistry;
use crate::services::screenshot::ScreenshotService;
use crate::services::scrcpy::{ConnectionRegistry, StreamManager};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub adb: AdbBridge,
    pub tasks: Arc<TaskRegistry>,
    pub screenshots: Arc<ScreenshotService>,
    pub streams: Arc<StreamManager>,
    pub connections: Arc<ConnectionRegistry>,
}

impl AppState {
    /// Wires the service singletons. Tests pass a scripted ADB executor.
    pub fn new(config: Config, pool: SqlitePool, adb: AdbBridge) -> Self {
        let screenshots = Arc::new(ScreenshotService::new(
            adb.clone(),
            config.screenshot.clone(),
            config.storage.screenshot_dir.clone(),
        ));
        let streams = Arc::new(StreamManager::new(adb.clone(), config.scrcpy.clone()));

        Self {
            pool,
            config: Arc::new(config),
            adb,
            tasks: Arc::new(TaskRegistry::new()),
            screenshots,
            streams,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        // Health
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        // Devices
        .route("/devices/list", get(devices::list_devices))
        .route("/devices/create", post(devices::create_device))
        .route("/devices/update", post(devices::update_device))
        .route("/devices/delete", post(devices::delete_device))
        .route("/devices/batch-go-home", post(devices::batch_go_home))
        .route("/devices/batch-kill-apps", post(devices::batch_kill_apps))
        // Groups
        .route("/groups/list", get(groups::list_groups))
        .route("/groups/create", post(groups::create_group))
        .route("/groups/update", post(groups::update_group))
        .route("/groups/delete", post(groups::delete_group))
        // Apps
        .route("/apps/list", get(apps::list_apps))
        .route("/apps/upload", post(apps::upload_app))
        .route("/apps/delete", post(apps::delete_app))
        .route("/apps/install", post(apps::install_app))
        .route("/apps/batch-install", post(apps::batch_install))
        .route("/apps/batch-uninstall", post(apps::batch_uninstall))
        .route("/apps/batch-start", post(apps::batch_start))
        .route(
            "/apps/batch-install-by-devices",
            post(apps::batch_install_by_devices),
        )
        .route(
            "/apps/batch-uninstall-by-devices",
            post(apps::batch_uninstall_by_devices),
        )
        .route(
            "/apps/batch-start-by-devices",
            post(apps::batch_start_by_devices),
        )
        .route(
            "/apps/batch-stop-by-devices",
            post(apps::batch_stop_by_devices),
        )
        .route("/apps/batch-task-status", get(apps::batch_task_status))
        // Files
        .route("/files/upload", post(files::upload_file))
        .route("/files/list", get(files::list_files))
        .route("/files/delete", post(files::delete_file))
        .route(
            "/files/batch-push-by-devices",
            post(files::batch_push_by_devices),
        )
        .route("/files/batch-task-status", get(apps::batch_task_status))
        // Screenshot
        .route("/screenshot/capture", post(screenshot::capture))
        // Stream control and the scrcpy proxy WebSocket
        .route("/stream/start", post(stream::start_stream))
        .route("/stream/stop", post(stream::stop_stream))
        .route("/", get(stream::ws_handler))
        // Global middleware (bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
