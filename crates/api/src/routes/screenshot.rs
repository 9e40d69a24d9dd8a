//! Screenshot endpoint handler.

use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::services::screenshot::{ScreenshotRequest, ScreenshotResponse};

/// POST /screenshot/capture
///
/// Always answers 200; capture failures are reported in the body with
/// `success == false`.
pub async fn capture(
    State(state): State<AppState>,
    Json(request): Json<ScreenshotRequest>,
) -> Json<ScreenshotResponse> {
    Json(state.screenshots.capture(&request).await)
}
