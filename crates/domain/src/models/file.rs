//! Stored file domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// File record status: 1 active, 0 deleted.
pub const FILE_STATUS_ACTIVE: i64 = 1;
pub const FILE_STATUS_DELETED: i64 = 0;

/// An uploaded file available for pushing to devices. The MD5 of the content
/// is the identity: re-uploading identical bytes yields the existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: i64,
    /// Generated on-disk name.
    pub name: String,
    /// Name the file was uploaded under.
    pub original_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_path: String,
    pub mime_type: String,
    pub md5: String,
    pub status: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileResponse {
    pub file_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub mime_type: String,
    pub md5: String,
    /// True when identical bytes were already stored and no new blob was
    /// written.
    pub already_exists: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    pub original_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    pub list: Vec<StoredFile>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileRequest {
    pub file_id: i64,
}

/// Push one stored file to many devices.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchPushRequest {
    pub file_id: i64,

    #[validate(length(min = 1, max = 50, message = "Between 1 and 50 devices per request"))]
    pub device_ids: Vec<String>,

    /// Requested parallelism; clamped server-side into the configured bound.
    #[serde(default = "default_max_worker")]
    pub max_worker: usize,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

fn default_max_worker() -> usize {
    1
}
