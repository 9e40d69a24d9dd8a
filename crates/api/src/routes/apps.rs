//! App endpoint handlers: CRUD plus the batch fleet operations.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use domain::models::app::{
    App, AppListQuery, AppListResponse, BatchByDevicesRequest, BatchByGroupRequest,
    DeleteAppRequest, InstallAppRequest, UploadAppResponse,
};
use domain::models::batch::TaskStatusQuery;
use domain::models::{BatchAccepted, TaskSnapshot};
use persistence::entities::AppEntity;
use persistence::repositories::{AppRepository, DeviceRepository};
use shared::naming;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::batch::TaskRegistry;

/// Which ADB verb a batch task runs per device.
#[derive(Debug, Clone, Copy)]
enum AppVerb {
    Install,
    Uninstall,
    Start,
    Stop,
}

/// GET /apps/list
pub async fn list_apps(
    State(state): State<AppState>,
    Query(query): Query<AppListQuery>,
) -> Result<Json<AppListResponse>, ApiError> {
    let repo = AppRepository::new(state.pool.clone());
    let (rows, total) = repo
        .list(
            query.page,
            query.page_size,
            query.app_type.as_deref(),
            query.keyword.as_deref(),
        )
        .await?;

    Ok(Json(AppListResponse {
        list: rows.into_iter().map(App::from).collect(),
        total,
        page: query.page,
        page_size: query.page_size,
    }))
}

/// POST /apps/upload
///
/// Multipart upload of an APK plus its metadata (`name`, `packageName`,
/// `version`, optional `appType`); manifest parsing happens upstream.
pub async fn upload_app(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadAppResponse>, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name = String::new();
    let mut name = String::new();
    let mut package_name = String::new();
    let mut version = String::new();
    let mut app_type = "user".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart payload: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;
                file_bytes = Some(bytes.to_vec());
            }
            "name" => name = read_text_field(field).await?,
            "packageName" => package_name = read_text_field(field).await?,
            "version" => version = read_text_field(field).await?,
            "appType" => app_type = read_text_field(field).await?,
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::Validation("an APK file is required".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("uploaded APK is empty".into()));
    }
    if !file_name.to_ascii_lowercase().ends_with(".apk") {
        return Err(ApiError::Validation("only .apk files are accepted".into()));
    }
    if name.is_empty() || package_name.is_empty() || version.is_empty() {
        return Err(ApiError::Validation(
            "name, packageName and version are required".into(),
        ));
    }

    let repo = AppRepository::new(state.pool.clone());
    if repo
        .find_by_package_version(&package_name, &version)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "app {package_name} version {version} already exists"
        )));
    }

    tokio::fs::create_dir_all(&state.config.storage.apk_dir).await?;
    let stored_name = naming::timestamped_name(".apk");
    let apk_path = format!("{}/{}", state.config.storage.apk_dir, stored_name);
    tokio::fs::write(&apk_path, &bytes).await?;

    let created = match repo
        .create(
            &name,
            &package_name,
            &version,
            bytes.len() as i64,
            &app_type,
            &apk_path,
        )
        .await
    {
        Ok(created) => created,
        Err(e) => {
            let _ = tokio::fs::remove_file(&apk_path).await;
            return Err(e.into());
        }
    };

    info!(app_id = created.id, package = %package_name, version = %version, "app uploaded");
    Ok(Json(UploadAppResponse {
        id: created.id,
        name: created.name,
        package_name: created.package_name,
        version: created.version,
        size: created.size,
        apk_path: created.apk_path,
    }))
}

/// POST /apps/delete
pub async fn delete_app(
    State(state): State<AppState>,
    Json(request): Json<DeleteAppRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let repo = AppRepository::new(state.pool.clone());
    let app = repo
        .find_by_id(request.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("app {} does not exist", request.id)))?;

    if tokio::fs::metadata(&app.apk_path).await.is_ok() {
        tokio::fs::remove_file(&app.apk_path).await?;
    }
    repo.delete(request.id).await?;
    Ok(Json(serde_json::json!({})))
}

/// POST /apps/install — synchronous single-device install.
pub async fn install_app(
    State(state): State<AppState>,
    Json(request): Json<InstallAppRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    request.validate()?;
    let app = load_app(&state, request.id, true).await?;

    let devices = DeviceRepository::new(state.pool.clone());
    if devices
        .find_by_address(&request.device_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "device {} does not exist",
            request.device_id
        )));
    }

    let output = state
        .adb
        .install_app(&request.device_id, &app.apk_path)
        .await?;
    Ok(Json(serde_json::json!({ "output": output.trim() })))
}

/// POST /apps/batch-install
pub async fn batch_install(
    State(state): State<AppState>,
    Json(request): Json<BatchByGroupRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    let app = load_app(&state, request.id, true).await?;
    let device_ids = group_device_addresses(&state, request.group_id).await?;
    submit_app_task(&state, app, device_ids, request.max_worker, AppVerb::Install).await
}

/// POST /apps/batch-uninstall
pub async fn batch_uninstall(
    State(state): State<AppState>,
    Json(request): Json<BatchByGroupRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    let app = load_app(&state, request.id, false).await?;
    let device_ids = group_device_addresses(&state, request.group_id).await?;
    submit_app_task(
        &state,
        app,
        device_ids,
        request.max_worker,
        AppVerb::Uninstall,
    )
    .await
}

/// POST /apps/batch-start
pub async fn batch_start(
    State(state): State<AppState>,
    Json(request): Json<BatchByGroupRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    let app = load_app(&state, request.id, false).await?;
    let device_ids = group_device_addresses(&state, request.group_id).await?;
    submit_app_task(&state, app, device_ids, request.max_worker, AppVerb::Start).await
}

/// POST /apps/batch-install-by-devices
pub async fn batch_install_by_devices(
    State(state): State<AppState>,
    Json(request): Json<BatchByDevicesRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    request.validate()?;
    let app = load_app(&state, request.id, true).await?;
    submit_app_task(
        &state,
        app,
        request.device_ids,
        request.max_worker,
        AppVerb::Install,
    )
    .await
}

/// POST /apps/batch-uninstall-by-devices
pub async fn batch_uninstall_by_devices(
    State(state): State<AppState>,
    Json(request): Json<BatchByDevicesRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    request.validate()?;
    let app = load_app(&state, request.id, false).await?;
    submit_app_task(
        &state,
        app,
        request.device_ids,
        request.max_worker,
        AppVerb::Uninstall,
    )
    .await
}

/// POST /apps/batch-start-by-devices
pub async fn batch_start_by_devices(
    State(state): State<AppState>,
    Json(request): Json<BatchByDevicesRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    request.validate()?;
    let app = load_app(&state, request.id, false).await?;
    submit_app_task(
        &state,
        app,
        request.device_ids,
        request.max_worker,
        AppVerb::Start,
    )
    .await
}

/// POST /apps/batch-stop-by-devices
pub async fn batch_stop_by_devices(
    State(state): State<AppState>,
    Json(request): Json<BatchByDevicesRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    request.validate()?;
    let app = load_app(&state, request.id, false).await?;
    submit_app_task(
        &state,
        app,
        request.device_ids,
        request.max_worker,
        AppVerb::Stop,
    )
    .await
}

/// GET /apps/batch-task-status and /files/batch-task-status
pub async fn batch_task_status(
    State(state): State<AppState>,
    Query(query): Query<TaskStatusQuery>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    state
        .tasks
        .snapshot(&query.task_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {} does not exist", query.task_id)))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| ApiError::Validation(format!("invalid multipart field: {e}")))
}

/// Loads the app and optionally asserts its APK is still on disk.
async fn load_app(state: &AppState, id: i64, require_apk: bool) -> Result<AppEntity, ApiError> {
    let repo = AppRepository::new(state.pool.clone());
    let app = repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("app {id} does not exist")))?;

    if require_apk && tokio::fs::metadata(&app.apk_path).await.is_err() {
        return Err(ApiError::NotFound(format!(
            "APK file for app {id} is missing"
        )));
    }
    Ok(app)
}

/// ADB addresses of every device in the group.
async fn group_device_addresses(state: &AppState, group_id: i64) -> Result<Vec<String>, ApiError> {
    let repo = DeviceRepository::new(state.pool.clone());
    Ok(repo
        .find_by_group(group_id)
        .await?
        .into_iter()
        .map(|d| d.device_id)
        .collect())
}

/// Clamps the worker count and hands the fan-out to the task manager.
async fn submit_app_task(
    state: &AppState,
    app: AppEntity,
    device_ids: Vec<String>,
    max_worker: usize,
    verb: AppVerb,
) -> Result<Json<BatchAccepted>, ApiError> {
    let workers = TaskRegistry::clamp_workers(max_worker, state.config.batch.max_worker);
    let adb = state.adb.clone();
    let apk_path = app.apk_path.clone();
    let package = app.package_name.clone();

    let task_id = state
        .tasks
        .submit(device_ids.clone(), workers, move |device| {
            let adb = adb.clone();
            let apk_path = apk_path.clone();
            let package = package.clone();
            async move {
                let result = match verb {
                    AppVerb::Install => adb.install_app(&device, &apk_path).await,
                    AppVerb::Uninstall => adb.uninstall_app(&device, &package).await,
                    AppVerb::Start => adb.start_app(&device, &package).await,
                    AppVerb::Stop => adb.stop_app(&device, &package).await,
                };
                match result {
                    Ok(output) => Ok(output.trim().to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
        })
        .await;

    info!(
        task_id = %task_id,
        app_id = app.id,
        verb = ?verb,
        devices = device_ids.len(),
        workers,
        "batch app task started"
    );

    Ok(Json(BatchAccepted {
        task_id,
        total: device_ids.len(),
        device_ids,
    }))
}
