use axum::Json;
use axum::extract::{Path, State};
use common::Permission;
use tracing::{info, instrument};

use crate::deferred::{DeferredUploadService, RetryResult};
use crate::entity::deferred_upload;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::models::deferred::DeferredUploadResponse;
use crate::sharing::SharingService;
use crate::state::AppState;

/// Load a deferred upload and check the caller's permission in its group.
///
/// Callers outside the group get the same 404 as for a missing row.
async fn load_for_member(
    state: &AppState,
    auth_user: &AuthUser,
    id: i32,
    permission: Permission,
) -> Result<deferred_upload::Model, AppError> {
    let not_found = || AppError::NotFound(format!("Deferred upload {id} not found"));

    let row = DeferredUploadService::new(&state.db)
        .get(id)
        .await?
        .ok_or_else(not_found)?;

    let membership = SharingService::new(&state.db)
        .membership(row.sharing_group_uuid, auth_user.user.id)
        .await?
        .ok_or_else(not_found)?;
    if !membership.permission.has_minimum(permission) {
        return Err(AppError::PermissionDenied);
    }

    Ok(row)
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Deferred Uploads",
    operation_id = "getDeferredUpload",
    summary = "Get the status of a deferred upload",
    description = "Clients poll this after a commit that returned a `deferred_upload_id`. Requires `read` permission in the upload's group.",
    params(("id" = i32, Path, description = "Deferred upload ID")),
    responses(
        (status = 200, description = "Deferred upload status", body = DeferredUploadResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Deferred upload not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id))]
pub async fn get_deferred_upload(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DeferredUploadResponse>, AppError> {
    let row = load_for_member(&state, &auth_user, id, Permission::Read).await?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    post,
    path = "/{id}/retry",
    tag = "Deferred Uploads",
    operation_id = "retryDeferredUpload",
    summary = "Retry a failed deferred upload",
    description = "Puts a deferred upload in the `error` state back to pending with a fresh attempt budget and wakes the reconciliation worker. Requires `write` permission in the upload's group.",
    params(("id" = i32, Path, description = "Deferred upload ID")),
    responses(
        (status = 200, description = "Deferred upload queued again", body = DeferredUploadResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Deferred upload not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Deferred upload has not failed (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id))]
pub async fn retry_deferred_upload(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DeferredUploadResponse>, AppError> {
    load_for_member(&state, &auth_user, id, Permission::Write).await?;

    let service = DeferredUploadService::new(&state.db);
    match service.retry(id).await? {
        RetryResult::Retried => {}
        RetryResult::NotFound => {
            return Err(AppError::NotFound(format!("Deferred upload {id} not found")));
        }
        RetryResult::NotFailed => {
            return Err(AppError::Conflict(format!(
                "Deferred upload {id} is not in the error state"
            )));
        }
    }

    info!(deferred_upload = id, "Deferred upload queued for retry");
    state.worker.notify();

    let row = service
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deferred upload {id} not found")))?;
    Ok(Json(row.into()))
}
