//! Group endpoint handlers.

use axum::extract::State;
use axum::Json;
use domain::models::group::{
    CreateGroupRequest, DeleteGroupRequest, Group, GroupListResponse, UpdateGroupRequest,
};
use persistence::repositories::{DeviceRepository, GroupRepository};
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// GET /groups/list
pub async fn list_groups(
    State(state): State<AppState>,
) -> Result<Json<GroupListResponse>, ApiError> {
    let repo = GroupRepository::new(state.pool.clone());
    let groups = repo.list().await?;
    let total = groups.len() as i64;

    Ok(Json(GroupListResponse {
        list: groups.into_iter().map(Group::from).collect(),
        total,
    }))
}

/// POST /groups/create
pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<Json<Group>, ApiError> {
    request.validate()?;

    let repo = GroupRepository::new(state.pool.clone());
    let group = repo.create(&request.name, &request.description).await?;

    info!(group_id = group.id, name = %group.name, "group created");
    Ok(Json(group.into()))
}

/// POST /groups/update
pub async fn update_group(
    State(state): State<AppState>,
    Json(request): Json<UpdateGroupRequest>,
) -> Result<Json<Group>, ApiError> {
    request.validate()?;

    let repo = GroupRepository::new(state.pool.clone());
    let affected = repo
        .update(
            request.id,
            request.name.as_deref(),
            request.description.as_deref(),
        )
        .await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!(
            "group {} does not exist",
            request.id
        )));
    }

    let updated = repo
        .find_by_id(request.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("group {} does not exist", request.id)))?;
    Ok(Json(updated.into()))
}

/// POST /groups/delete
///
/// A group can only be deleted once it has no member devices.
pub async fn delete_group(
    State(state): State<AppState>,
    Json(request): Json<DeleteGroupRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let devices = DeviceRepository::new(state.pool.clone());
    let members = devices.count_in_group(request.id).await?;
    if members > 0 {
        return Err(ApiError::Conflict(format!(
            "group {} still has {members} devices",
            request.id
        )));
    }

    let repo = GroupRepository::new(state.pool.clone());
    let affected = repo.delete(request.id).await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!(
            "group {} does not exist",
            request.id
        )));
    }

    info!(group_id = request.id, "group deleted");
    Ok(Json(serde_json::json!({})))
}
