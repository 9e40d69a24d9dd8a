//! Device endpoint handlers.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use domain::models::device::{
    CreateDeviceRequest, DeleteDeviceRequest, Device, DeviceBatchRequest, DeviceBatchResponse,
    DeviceListQuery, DeviceListResponse, DeviceStatus, UpdateDeviceRequest,
};
use futures_util::future::join_all;
use persistence::repositories::{DeviceRepository, GroupRepository};
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// GET /devices/list
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceListQuery>,
) -> Result<Json<DeviceListResponse>, ApiError> {
    let repo = DeviceRepository::new(state.pool.clone());
    let (rows, total) = repo
        .list(
            query.page,
            query.page_size,
            query.group_id,
            query.keyword.as_deref(),
        )
        .await?;

    Ok(Json(DeviceListResponse {
        list: rows.into_iter().map(Device::from).collect(),
        total,
        page: query.page,
        page_size: query.page_size,
    }))
}

/// POST /devices/create
///
/// The device is probed over ADB once so a reachable device registers as
/// online immediately; probe failures are not fatal.
pub async fn create_device(
    State(state): State<AppState>,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<Json<Device>, ApiError> {
    request.validate()?;

    if request.group_id != 0 {
        let groups = GroupRepository::new(state.pool.clone());
        if groups.find_by_id(request.group_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "group {} does not exist",
                request.group_id
            )));
        }
    }

    let _ = state.adb.connect(&request.device_id).await;
    let status = match state.adb.probe(&request.device_id).await {
        Ok(true) => DeviceStatus::Online,
        _ => DeviceStatus::Offline,
    };

    let repo = DeviceRepository::new(state.pool.clone());
    let created = repo
        .create(
            &request.name,
            &request.device_id,
            request.group_id,
            status.as_str(),
        )
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("2067") => {
                ApiError::Conflict(format!("device {} already exists", request.device_id))
            }
            other => other.into(),
        })?;

    info!(device_id = %created.device_id, id = created.id, "device registered");
    Ok(Json(created.into()))
}

/// POST /devices/update
pub async fn update_device(
    State(state): State<AppState>,
    Json(request): Json<UpdateDeviceRequest>,
) -> Result<Json<Device>, ApiError> {
    request.validate()?;

    if let Some(group_id) = request.group_id {
        if group_id != 0 {
            let groups = GroupRepository::new(state.pool.clone());
            if groups.find_by_id(group_id).await?.is_none() {
                return Err(ApiError::NotFound(format!("group {group_id} does not exist")));
            }
        }
    }

    let repo = DeviceRepository::new(state.pool.clone());
    let affected = repo
        .update(request.id, request.name.as_deref(), request.group_id)
        .await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!(
            "device {} does not exist",
            request.id
        )));
    }

    let updated = repo
        .find_by_id(request.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {} does not exist", request.id)))?;
    Ok(Json(updated.into()))
}

/// POST /devices/delete
pub async fn delete_device(
    State(state): State<AppState>,
    Json(request): Json<DeleteDeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let repo = DeviceRepository::new(state.pool.clone());
    let affected = repo.delete(request.id).await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!(
            "device {} does not exist",
            request.id
        )));
    }
    Ok(Json(serde_json::json!({})))
}

/// POST /devices/batch-go-home
///
/// Sends the HOME keyevent to up to 50 devices concurrently and reports a
/// per-device outcome map (empty string means success).
pub async fn batch_go_home(
    State(state): State<AppState>,
    Json(request): Json<DeviceBatchRequest>,
) -> Result<Json<DeviceBatchResponse>, ApiError> {
    request.validate()?;
    let results = fan_out(&state, request.device_ids, |adb, device| async move {
        adb.go_home(&device).await.map(|_| ())
    })
    .await;
    Ok(Json(DeviceBatchResponse { results }))
}

/// POST /devices/batch-kill-apps
///
/// Force-stops third-party packages on up to 50 devices concurrently.
pub async fn batch_kill_apps(
    State(state): State<AppState>,
    Json(request): Json<DeviceBatchRequest>,
) -> Result<Json<DeviceBatchResponse>, ApiError> {
    request.validate()?;
    let results = fan_out(&state, request.device_ids, |adb, device| async move {
        adb.kill_background_apps(&device).await.map(|_| ())
    })
    .await;
    Ok(Json(DeviceBatchResponse { results }))
}

async fn fan_out<F, Fut>(
    state: &AppState,
    device_ids: Vec<String>,
    op: F,
) -> HashMap<String, String>
where
    F: Fn(shared::adb::AdbBridge, String) -> Fut,
    Fut: std::future::Future<Output = Result<(), shared::adb::AdbError>>,
{
    let futures = device_ids.into_iter().map(|device| {
        let fut = op(state.adb.clone(), device.clone());
        async move {
            let outcome = match fut.await {
                Ok(()) => String::new(),
                Err(e) => e.to_string(),
            };
            (device, outcome)
        }
    });

    join_all(futures).await.into_iter().collect()
}
