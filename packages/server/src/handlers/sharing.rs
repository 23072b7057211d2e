use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common::Permission;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::models::shared::normalize_group_name;
use crate::models::sharing::*;
use crate::models::upload::{IndexResponse, VersionResponse};
use crate::sharing::{GroupSummary, SharingService};
use crate::state::AppState;
use crate::upload::FileService;

#[utoipa::path(
    post,
    path = "/",
    tag = "Sharing Groups",
    operation_id = "createSharingGroup",
    summary = "Create a sharing group",
    description = "Creates a sharing group with the caller as admin and master version 0. Only owning accounts (Google, Dropbox, Microsoft) may create groups.",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = GroupResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Sharing account (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user_id = auth_user.user.id))]
pub async fn create_group(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = normalize_group_name(payload.name)?;

    let group = SharingService::new(&state.db)
        .create_group(&auth_user.user, payload.sharing_group_uuid, name)
        .await?;

    let response = GroupResponse::from(GroupSummary {
        sharing_group_uuid: group.sharing_group_uuid,
        name: group.name,
        permission: Permission::Admin,
        master_version: 0,
    });
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Sharing Groups",
    operation_id = "listSharingGroups",
    summary = "List the caller's sharing groups",
    description = "Returns every non-deleted group the caller belongs to, with the caller's permission and the group's current master version.",
    responses(
        (status = 200, description = "Groups of the caller", body = Vec<GroupResponse>),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id))]
pub async fn list_groups(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupResponse>>, AppError> {
    let groups = SharingService::new(&state.db)
        .groups_for_user(auth_user.user.id)
        .await?;
    Ok(Json(groups.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    patch,
    path = "/{uuid}",
    tag = "Sharing Groups",
    operation_id = "renameSharingGroup",
    summary = "Rename a sharing group",
    description = "Sets or clears the group name. Requires `admin` permission in the group.",
    params(("uuid" = Uuid, Path, description = "Sharing group UUID")),
    request_body = UpdateGroupRequest,
    responses(
        (status = 204, description = "Group renamed"),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Group not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user_id = auth_user.user.id, sharing_group = %uuid))]
pub async fn rename_group(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    AppJson(payload): AppJson<UpdateGroupRequest>,
) -> Result<StatusCode, AppError> {
    let Some(name) = payload.name else {
        return Err(AppError::Validation("No fields to update".into()));
    };
    let name = normalize_group_name(name)?;

    SharingService::new(&state.db)
        .rename_group(auth_user.user.id, uuid, name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/{uuid}",
    tag = "Sharing Groups",
    operation_id = "deleteSharingGroup",
    summary = "Delete a sharing group",
    description = "Marks the group deleted. Its files become tombstones, its memberships and invitations are removed and the master version advances. Staging, commits and invitations into it are refused afterwards. Requires `admin` permission.",
    params(("uuid" = Uuid, Path, description = "Sharing group UUID")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Group not found (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Group locked by a commit (BUSY)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id, sharing_group = %uuid))]
pub async fn delete_group(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    SharingService::new(&state.db)
        .soft_delete_group(auth_user.user.id, uuid, state.config.sync.commit_lock_expiry())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/{uuid}/leave",
    tag = "Sharing Groups",
    operation_id = "leaveSharingGroup",
    summary = "Leave a sharing group",
    description = "Removes the caller from the group. Files stored in a leaving owning user's cloud storage become tombstones, which advances the master version. The last member leaving deletes the group.",
    params(("uuid" = Uuid, Path, description = "Sharing group UUID")),
    responses(
        (status = 200, description = "Membership removed", body = LeaveGroupResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Not a member (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Group locked by a commit (BUSY)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id, sharing_group = %uuid))]
pub async fn leave_group(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<LeaveGroupResponse>, AppError> {
    let outcome = SharingService::new(&state.db)
        .leave_group(&auth_user.user, uuid, state.config.sync.commit_lock_expiry())
        .await?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    get,
    path = "/{uuid}/index",
    tag = "Sharing Groups",
    operation_id = "getFileIndex",
    summary = "Get the file index of a group",
    description = "Returns every file of the group, tombstones included, with the current master version. Clients resynchronise from this after a `master_version_update` commit result. Requires `read` permission.",
    params(("uuid" = Uuid, Path, description = "Sharing group UUID")),
    responses(
        (status = 200, description = "File index", body = IndexResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Group not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id, sharing_group = %uuid))]
pub async fn get_index(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<IndexResponse>, AppError> {
    let snapshot = FileService::new(&state.db, state.accounts.as_ref(), &state.resolvers)
        .index(&auth_user.user, uuid)
        .await?;
    Ok(Json(snapshot.into()))
}

#[utoipa::path(
    get,
    path = "/{uuid}/version",
    tag = "Sharing Groups",
    operation_id = "getMasterVersion",
    summary = "Get the master version of a group",
    params(("uuid" = Uuid, Path, description = "Sharing group UUID")),
    responses(
        (status = 200, description = "Current master version", body = VersionResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Group not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id, sharing_group = %uuid))]
pub async fn get_version(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<VersionResponse>, AppError> {
    let master_version = FileService::new(&state.db, state.accounts.as_ref(), &state.resolvers)
        .current_version(&auth_user.user, uuid)
        .await?;
    Ok(Json(VersionResponse { master_version }))
}
