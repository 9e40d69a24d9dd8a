//! Device group domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A named collection of devices. Group 0 ("new devices") is implicit and
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be between 1 and 64 characters"))]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 255, message = "Description is limited to 255 characters"))]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    pub id: i64,

    #[validate(length(min = 1, max = 64, message = "Name must be between 1 and 64 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 255, message = "Description is limited to 255 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteGroupRequest {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct GroupListResponse {
    pub list: Vec<Group>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_requires_name() {
        let request = CreateGroupRequest {
            name: String::new(),
            description: String::new(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn update_request_allows_partial_fields() {
        let request = UpdateGroupRequest {
            id: 3,
            name: None,
            description: Some("farm rack 2".to_string()),
        };
        assert!(request.validate().is_ok());
    }
}
