//! Stream endpoints: bring-up, teardown and the scrcpy WebSocket proxy.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::Json;
use domain::models::stream::{StartStreamRequest, StartStreamResponse, StopStreamRequest};
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::scrcpy::proxy;

/// POST /stream/start
pub async fn start_stream(
    State(state): State<AppState>,
    Json(request): Json<StartStreamRequest>,
) -> Result<Json<StartStreamResponse>, ApiError> {
    if request.device_id.is_empty() {
        return Err(ApiError::Validation("deviceId is required".into()));
    }
    let response = state.streams.start(&request.device_id).await?;
    info!(device_id = %request.device_id, port = response.port, "stream started");
    Ok(Json(response))
}

/// POST /stream/stop
pub async fn stop_stream(
    State(state): State<AppState>,
    Json(request): Json<StopStreamRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.device_id.is_empty() {
        return Err(ApiError::Validation("deviceId is required".into()));
    }
    state.streams.stop(&request.device_id).await?;
    info!(device_id = %request.device_id, "stream stopped");
    Ok(Json(serde_json::json!({})))
}

/// Query parameters of the proxy upgrade request.
#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub udid: Option<String>,
    pub port: Option<u16>,
}

/// GET /?udid=<device>&port=<localPort> — scrcpy proxy WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ProxyQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let udid = params
        .udid
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::Validation("udid query parameter is required".into()))?;
    let port = params
        .port
        .filter(|p| *p > 0)
        .ok_or_else(|| ApiError::Validation("port query parameter is required".into()))?;

    Ok(ws.on_upgrade(move |socket| {
        proxy::handle_socket(state.connections.clone(), state.adb.clone(), socket, udid, port)
    }))
}
