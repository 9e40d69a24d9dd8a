//! Device domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A managed device reachable over the debug bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    /// Operator-facing name.
    pub name: String,
    /// ADB-reachable identifier, e.g. `10.0.0.5:5555`.
    pub device_id: String,
    /// Owning group; 0 means ungrouped.
    pub group_id: i64,
    pub status: DeviceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }

    /// Lenient parse for database values; unknown strings read as offline.
    pub fn from_db(value: &str) -> Self {
        match value {
            "online" => DeviceStatus::Online,
            _ => DeviceStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be between 1 and 64 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 128, message = "Device address is required"))]
    pub device_id: String,

    #[serde(default)]
    pub group_id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    pub id: i64,

    #[validate(length(min = 1, max = 64, message = "Name must be between 1 and 64 characters"))]
    pub name: Option<String>,

    pub group_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteDeviceRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    pub group_id: Option<i64>,
    pub keyword: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListResponse {
    pub list: Vec<Device>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Request for the synchronous per-device keyevent fan-outs
/// (`batch-go-home`, `batch-kill-apps`).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBatchRequest {
    #[validate(length(min = 1, max = 50, message = "Between 1 and 50 devices per request"))]
    pub device_ids: Vec<String>,
}

/// Per-device outcome map: empty string on success, error text otherwise.
#[derive(Debug, Serialize)]
pub struct DeviceBatchResponse {
    pub results: std::collections::HashMap<String, String>,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}
