//! Application (APK) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// An uploaded APK tracked by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: i64,
    pub name: String,
    pub package_name: String,
    pub version: String,
    /// APK size in bytes.
    pub size: i64,
    pub app_type: AppType,
    /// Server-local path of the stored APK.
    pub apk_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    System,
    User,
    Settings,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::System => "system",
            AppType::User => "user",
            AppType::Settings => "settings",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "system" => AppType::System,
            "settings" => AppType::Settings,
            _ => AppType::User,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    pub app_type: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppListResponse {
    pub list: Vec<App>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteAppRequest {
    pub id: i64,
}

/// Synchronous single-device install.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InstallAppRequest {
    pub id: i64,

    #[validate(length(min = 1, message = "Device address is required"))]
    pub device_id: String,
}

/// Fan-out over every device of a group.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchByGroupRequest {
    pub id: i64,
    pub group_id: i64,

    /// Requested parallelism; clamped server-side into the configured bound.
    #[serde(default = "default_max_worker")]
    pub max_worker: usize,
}

/// Fan-out over an explicit device list.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchByDevicesRequest {
    pub id: i64,

    #[validate(length(min = 1, max = 50, message = "Between 1 and 50 devices per request"))]
    pub device_ids: Vec<String>,

    /// Requested parallelism; clamped server-side into the configured bound.
    #[serde(default = "default_max_worker")]
    pub max_worker: usize,
}

/// Response for an APK upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAppResponse {
    pub id: i64,
    pub name: String,
    pub package_name: String,
    pub version: String,
    pub size: i64,
    pub apk_path: String,
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
