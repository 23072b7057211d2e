use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::models::sharing::*;
use crate::sharing::{InvitationService, NewInvitation};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/{uuid}/invitations",
    tag = "Invitations",
    operation_id = "createInvitation",
    summary = "Invite users into a sharing group",
    description = "Creates an invitation redeemable by up to `number_acceptors` users before it expires. Requires `admin` permission in the group.",
    params(("uuid" = Uuid, Path, description = "Sharing group UUID")),
    request_body = CreateInvitationRequest,
    responses(
        (status = 201, description = "Invitation created", body = InvitationResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Group not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user_id = auth_user.user.id, sharing_group = %uuid))]
pub async fn create_invitation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    AppJson(payload): AppJson<CreateInvitationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = NewInvitation {
        sharing_group_uuid: uuid,
        permission: payload.permission,
        number_acceptors: payload.number_acceptors,
        allow_social_acceptance: payload.allow_social_acceptance,
        expiry_secs: payload.expiry_secs,
    };

    let invitation = InvitationService::new(&state.db)
        .create_invitation(&auth_user.user, request, &state.config.invitation)
        .await?;

    Ok((StatusCode::CREATED, Json(InvitationResponse::from(invitation))))
}

#[utoipa::path(
    get,
    path = "/{uuid}",
    tag = "Invitations",
    operation_id = "getInvitationInfo",
    summary = "Inspect an invitation",
    description = "Returns what the invitation grants without redeeming it. Expired invitations are reported as not found.",
    params(("uuid" = Uuid, Path, description = "Invitation UUID")),
    responses(
        (status = 200, description = "Invitation details", body = InvitationInfoResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Invitation not found or expired (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user), fields(invitation = %uuid))]
pub async fn get_invitation(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<InvitationInfoResponse>, AppError> {
    let info = InvitationService::new(&state.db)
        .invitation_info(uuid)
        .await?;
    Ok(Json(info.into()))
}

#[utoipa::path(
    post,
    path = "/{uuid}/redeem",
    tag = "Invitations",
    operation_id = "redeemInvitation",
    summary = "Redeem an invitation",
    description = "Adds the caller to the invitation's group with the invited permission and consumes one acceptance. \
        Sharing accounts may redeem only invitations that allow social acceptance; their files are stored with the inviting owning user.",
    params(("uuid" = Uuid, Path, description = "Invitation UUID")),
    responses(
        (status = 200, description = "Membership granted", body = RedeemResponse),
        (status = 400, description = "Already a member or own invitation (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Social acceptance not allowed (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Invitation not found, expired or used up (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user.id, invitation = %uuid))]
pub async fn redeem_invitation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<RedeemResponse>, AppError> {
    let outcome = InvitationService::new(&state.db)
        .redeem(&auth_user.user, uuid)
        .await?;
    Ok(Json(outcome.into()))
}
