use axum::Json;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::UploadState;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::device::Device;
use crate::extractors::json::AppJson;
use crate::models::upload::*;
use crate::state::AppState;
use crate::upload::{CommitRequest, CommitService, FileService, StageUpload};

pub const CHECKSUM_HEADER: &str = "X-Checksum";
pub const FILE_VERSION_HEADER: &str = "X-File-Version";

/// Staging requests carry whole v0 files inline.
pub fn stage_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(64 * 1024 * 1024) // 64 MB
}

#[utoipa::path(
    post,
    path = "/{uuid}/uploads",
    tag = "Uploads",
    operation_id = "stageUpload",
    summary = "Stage one operation of the device's batch",
    description = "Stages a file operation for the next commit. A `v0UploadCompleteFile` with `content` is stored in the effective owning user's cloud storage first. Staging the same operation twice is idempotent. Requires `write` permission.",
    params(
        ("uuid" = Uuid, Path, description = "Sharing group UUID"),
        ("X-Device-UUID" = Uuid, Header, description = "Device UUID"),
    ),
    request_body = StageUploadRequest,
    responses(
        (status = 201, description = "Upload staged", body = UploadResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID, CREDENTIALS_REVOKED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Group not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "First version of a file that already exists (FILE_VERSION_CONFLICT)", body = ErrorBody),
        (status = 502, description = "Cloud storage failure (EXTERNAL_ERROR)", body = ErrorBody),
        (status = 503, description = "The device is already uploading to the group (BUSY)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(
    skip(state, auth_user, payload),
    fields(user_id = auth_user.user.id, sharing_group = %uuid, device = %device, file = %payload.file_uuid)
)]
pub async fn stage_upload(
    auth_user: AuthUser,
    Device(device): Device,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    AppJson(payload): AppJson<StageUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = StageUpload::from(payload);
    let files = FileService::new(&state.db, state.accounts.as_ref(), &state.resolvers)
        .with_lock_expiry(state.config.sync.commit_lock_expiry());

    let staged = if request.state == UploadState::V0UploadCompleteFile && request.contents.is_some() {
        files.upload_file(&auth_user.user, device, uuid, request).await?
    } else {
        files.stage_upload(&auth_user.user, device, uuid, request).await?
    };

    Ok((StatusCode::CREATED, Json(UploadResponse::from(staged))))
}

#[utoipa::path(
    delete,
    path = "/{uuid}/uploads",
    tag = "Uploads",
    operation_id = "abandonUploads",
    summary = "Abandon the device's staged batch",
    description = "Removes every uncommitted upload the device staged in the group, along with content already written to cloud storage for its v0 uploads.",
    params(
        ("uuid" = Uuid, Path, description = "Sharing group UUID"),
        ("X-Device-UUID" = Uuid, Header, description = "Device UUID"),
    ),
    responses(
        (status = 200, description = "Batch abandoned", body = AbandonResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 503, description = "Group locked by a commit (BUSY)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id, sharing_group = %uuid, device = %device))]
pub async fn abandon_uploads(
    auth_user: AuthUser,
    Device(device): Device,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<AbandonResponse>, AppError> {
    let removed = FileService::new(&state.db, state.accounts.as_ref(), &state.resolvers)
        .with_lock_expiry(state.config.sync.commit_lock_expiry())
        .abandon(&auth_user.user, device, uuid)
        .await?;
    Ok(Json(AbandonResponse { removed }))
}

#[utoipa::path(
    post,
    path = "/{uuid}/commit",
    tag = "Uploads",
    operation_id = "commitUploads",
    summary = "Commit the device's staged batch",
    description = "Applies the whole batch atomically and advances the master version by one. \
        If the group's master version differs from the one sent, nothing is applied and the \
        response carries `result = master_version_update` with the current version. Content \
        changes and deletions are finished by the reconciliation worker; poll the returned \
        `deferred_upload_id` for their status.",
    params(
        ("uuid" = Uuid, Path, description = "Sharing group UUID"),
        ("X-Device-UUID" = Uuid, Header, description = "Device UUID"),
    ),
    request_body = CommitRequestBody,
    responses(
        (status = 200, description = "Commit result", body = CommitResponse),
        (status = 400, description = "Batch incomplete or invalid (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 409, description = "A file changed underneath the batch (FILE_VERSION_CONFLICT)", body = ErrorBody),
        (status = 503, description = "Another commit holds the group lock (BUSY)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(
    skip(state, auth_user, payload),
    fields(user_id = auth_user.user.id, sharing_group = %uuid, device = %device, master_version = payload.master_version)
)]
pub async fn commit_uploads(
    auth_user: AuthUser,
    Device(device): Device,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    AppJson(payload): AppJson<CommitRequestBody>,
) -> Result<Json<CommitResponse>, AppError> {
    let outcome = CommitService::new(&state.db, state.config.sync.commit_lock_expiry())
        .with_worker(&state.worker)
        .commit(
            &auth_user.user,
            CommitRequest {
                sharing_group_uuid: uuid,
                device_uuid: device,
                master_version: payload.master_version,
            },
        )
        .await?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    get,
    path = "/{uuid}/files/{file_uuid}",
    tag = "Uploads",
    operation_id = "downloadFile",
    summary = "Download the current version of a file",
    description = "Returns the file content with its checksum in `X-Checksum` and `ETag`, and its version in `X-File-Version`. A file whose last change is still being merged answers 503 BUSY. Requires `read` permission.",
    params(
        ("uuid" = Uuid, Path, description = "Sharing group UUID"),
        ("file_uuid" = Uuid, Path, description = "File UUID"),
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 304, description = "Not Modified (ETag match)"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID, CREDENTIALS_REVOKED)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "File not found or deleted (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Merge pending (BUSY)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, headers), fields(user_id = auth_user.user.id, sharing_group = %uuid, file = %file_uuid))]
pub async fn download_file(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((uuid, file_uuid)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let file = FileService::new(&state.db, state.accounts.as_ref(), &state.resolvers)
        .download_file(&auth_user.user, uuid, file_uuid)
        .await?;

    let etag_value = format!("\"{}\"", file.checksum);
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && let Ok(val) = if_none_match.to_str()
        && (val == etag_value || val == "*")
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let content_type = file
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, file.contents.len().to_string())
        .header(header::ETAG, &etag_value)
        .header(CHECKSUM_HEADER, &file.checksum)
        .header(FILE_VERSION_HEADER, file.file_version.to_string())
        .body(Body::from(file.contents))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))?;

    Ok(response)
}
