//! File endpoint handlers: uploads, listing, batch push to devices.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use domain::models::file::{
    BatchPushRequest, DeleteFileRequest, FileListQuery, FileListResponse, UploadFileResponse,
};
use domain::models::{BatchAccepted, StoredFile};
use md5::{Digest, Md5};
use persistence::repositories::FileRepository;
use shared::naming;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::batch::TaskRegistry;

/// Device-side directory batch pushes land in.
const DEVICE_TARGET_DIR: &str = "/data/local/tmp";

/// POST /files/upload
///
/// MD5 over the content is the identity: uploading identical bytes again
/// returns the existing record (flagged `alreadyExists`) and writes nothing.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadFileResponse>, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name = String::new();
    let mut mime_type = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart payload: {e}")))?
    {
        if field.name() == Some("file") {
            original_name = field.file_name().unwrap_or_default().to_string();
            mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;
            file_bytes = Some(bytes.to_vec());
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::Validation("a file is required".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("uploaded file is empty".into()));
    }
    if original_name.is_empty() {
        return Err(ApiError::Validation("file name is required".into()));
    }

    let md5 = hex::encode(Md5::digest(&bytes));
    let repo = FileRepository::new(state.pool.clone());

    if let Some(existing) = repo.find_active_by_md5(&md5).await? {
        if existing.original_name != original_name {
            repo.update_original_name(existing.id, &original_name).await?;
        }
        info!(file_id = existing.id, md5 = %md5, "upload matched existing content");
        return Ok(Json(UploadFileResponse {
            file_id: existing.id,
            file_name: existing.name,
            original_name,
            file_type: existing.file_type,
            file_size: existing.file_size,
            mime_type: existing.mime_type,
            md5,
            already_exists: true,
        }));
    }

    let ext = std::path::Path::new(&original_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let file_type = naming::file_type_for_extension(&ext);

    let dir = format!("{}/{}", state.config.storage.files_dir, file_type);
    tokio::fs::create_dir_all(&dir).await?;
    let stored_name = naming::timestamped_name(&ext);
    let file_path = format!("{dir}/{stored_name}");
    tokio::fs::write(&file_path, &bytes).await?;

    let created = match repo
        .create(
            &stored_name,
            &original_name,
            file_type,
            bytes.len() as i64,
            &file_path,
            &mime_type,
            &md5,
        )
        .await
    {
        Ok(created) => created,
        Err(e) => {
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(e.into());
        }
    };

    info!(file_id = created.id, md5 = %md5, size = created.file_size, "file stored");
    Ok(Json(UploadFileResponse {
        file_id: created.id,
        file_name: created.name,
        original_name: created.original_name,
        file_type: created.file_type,
        file_size: created.file_size,
        mime_type: created.mime_type,
        md5: created.md5,
        already_exists: false,
    }))
}

/// GET /files/list
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> Result<Json<FileListResponse>, ApiError> {
    let repo = FileRepository::new(state.pool.clone());
    let (rows, total) = repo
        .list(query.page, query.page_size, query.original_name.as_deref())
        .await?;

    Ok(Json(FileListResponse {
        list: rows.into_iter().map(StoredFile::from).collect(),
        total,
        page: query.page,
        page_size: query.page_size,
    }))
}

/// POST /files/delete
///
/// Removes the blob and flips the row to deleted.
pub async fn delete_file(
    State(state): State<AppState>,
    Json(request): Json<DeleteFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let repo = FileRepository::new(state.pool.clone());
    let file = repo
        .find_by_id(request.file_id)
        .await?
        .filter(|f| f.status == 1)
        .ok_or_else(|| ApiError::NotFound(format!("file {} does not exist", request.file_id)))?;

    if tokio::fs::metadata(&file.file_path).await.is_ok() {
        tokio::fs::remove_file(&file.file_path).await?;
    }
    repo.mark_deleted(file.id).await?;
    Ok(Json(serde_json::json!({})))
}

/// POST /files/batch-push-by-devices
pub async fn batch_push_by_devices(
    State(state): State<AppState>,
    Json(request): Json<BatchPushRequest>,
) -> Result<Json<BatchAccepted>, ApiError> {
    request.validate()?;

    let repo = FileRepository::new(state.pool.clone());
    let file = repo
        .find_by_id(request.file_id)
        .await?
        .filter(|f| f.status == 1)
        .ok_or_else(|| ApiError::NotFound(format!("file {} does not exist", request.file_id)))?;

    if tokio::fs::metadata(&file.file_path).await.is_err() {
        return Err(ApiError::NotFound(format!(
            "stored blob for file {} is missing",
            file.id
        )));
    }

    let workers = TaskRegistry::clamp_workers(request.max_worker, state.config.batch.max_worker);
    let device_path = format!("{DEVICE_TARGET_DIR}/{}", file.original_name);
    let adb = state.adb.clone();
    let local_path = file.file_path.clone();

    let task_id = state
        .tasks
        .submit(request.device_ids.clone(), workers, move |device| {
            let adb = adb.clone();
            let local_path = local_path.clone();
            let device_path = device_path.clone();
            async move {
                match adb.push(&device, &local_path, &device_path).await {
                    Ok(output) => Ok(output.trim().to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
        })
        .await;

    info!(
        task_id = %task_id,
        file_id = file.id,
        devices = request.device_ids.len(),
        workers,
        "batch file push started"
    );

    Ok(Json(BatchAccepted {
        task_id,
        total: request.device_ids.len(),
        device_ids: request.device_ids,
    }))
}
