use anyhow::Result;
use shared::adb::AdbBridge;
use tracing::info;

use devicefarm_api::app::{create_app, AppState};
use devicefarm_api::config::Config;
use devicefarm_api::jobs::{JobScheduler, ScreenshotCacheSweepJob, StreamIdleSweepJob};
use devicefarm_api::middleware::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    init_logging(&config.logging);

    info!("Starting Device Farm API v{}", env!("CARGO_PKG_VERSION"));

    // The database file and upload trees live under relative paths.
    for dir in [
        "data",
        config.storage.apk_dir.as_str(),
        config.storage.files_dir.as_str(),
        config.storage.screenshot_dir.as_str(),
    ] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let pool = persistence::db::create_pool(&persistence::db::DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        connect_timeout_secs: config.database.connect_timeout_secs,
    })
    .await?;

    info!("Running database migrations");
    persistence::db::MIGRATOR.run(&pool).await?;

    let state = AppState::new(config.clone(), pool, AdbBridge::system());

    let mut scheduler = JobScheduler::new();
    scheduler.register(ScreenshotCacheSweepJob::new(state.screenshots.clone()));
    scheduler.register(StreamIdleSweepJob::new(
        state.connections.clone(),
        state.tasks.clone(),
    ));
    scheduler.start();

    let app = create_app(state);
    let addr = config.socket_addr()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    scheduler.shutdown();
    Ok(())
}
