use chrono::{DateTime, Utc};
use common::Permission;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::sharing_invitation;
use crate::sharing::{GroupSummary, InvitationInfo, LeaveOutcome, RedeemOutcome};

use super::shared::double_option;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateGroupRequest {
    /// Client-chosen group UUID. Generated when absent.
    pub sharing_group_uuid: Option<Uuid>,
    #[schema(example = "Family photos")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateGroupRequest {
    /// New name; `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>, example = "Family photos")]
    pub name: Option<Option<String>>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct GroupResponse {
    pub sharing_group_uuid: Uuid,
    pub name: Option<String>,
    /// The caller's permission in the group.
    #[schema(value_type = String, example = "admin")]
    pub permission: Permission,
    #[schema(example = 0)]
    pub master_version: i64,
}

impl From<GroupSummary> for GroupResponse {
    fn from(g: GroupSummary) -> Self {
        Self {
            sharing_group_uuid: g.sharing_group_uuid,
            name: g.name,
            permission: g.permission,
            master_version: g.master_version,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LeaveGroupResponse {
    /// Files of the leaving owning user that became tombstones.
    pub files_deleted: u64,
    /// The caller was the last member and the group is gone.
    pub group_deleted: bool,
}

impl From<LeaveOutcome> for LeaveGroupResponse {
    fn from(o: LeaveOutcome) -> Self {
        Self {
            files_deleted: o.files_deleted,
            group_deleted: o.group_deleted,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateInvitationRequest {
    #[schema(value_type = String, example = "write")]
    pub permission: Permission,
    /// How many users may redeem the invitation. Default: 1.
    #[schema(example = 1)]
    pub number_acceptors: Option<i32>,
    /// Let sharing (social) accounts redeem. Default: false.
    #[serde(default)]
    pub allow_social_acceptance: bool,
    /// Seconds until expiry. Default: server configured.
    #[schema(example = 86400)]
    pub expiry_secs: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct InvitationResponse {
    pub sharing_invitation_uuid: Uuid,
    pub sharing_group_uuid: Uuid,
    #[schema(value_type = String, example = "write")]
    pub permission: Permission,
    pub number_acceptors: i32,
    pub allow_social_acceptance: bool,
    pub expiry: DateTime<Utc>,
}

impl From<sharing_invitation::Model> for InvitationResponse {
    fn from(m: sharing_invitation::Model) -> Self {
        Self {
            sharing_invitation_uuid: m.sharing_invitation_uuid,
            sharing_group_uuid: m.sharing_group_uuid,
            permission: m.permission,
            number_acceptors: m.number_acceptors,
            allow_social_acceptance: m.allow_social_acceptance,
            expiry: m.expiry,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct InvitationInfoResponse {
    pub sharing_group_uuid: Uuid,
    #[schema(value_type = String, example = "read")]
    pub permission: Permission,
    pub allow_social_acceptance: bool,
    pub number_acceptors: i32,
    pub expiry: DateTime<Utc>,
}

impl From<InvitationInfo> for InvitationInfoResponse {
    fn from(i: InvitationInfo) -> Self {
        Self {
            sharing_group_uuid: i.sharing_group_uuid,
            permission: i.permission,
            allow_social_acceptance: i.allow_social_acceptance,
            number_acceptors: i.number_acceptors,
            expiry: i.expiry,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RedeemResponse {
    pub sharing_group_uuid: Uuid,
    #[schema(value_type = String, example = "read")]
    pub permission: Permission,
}

impl From<RedeemOutcome> for RedeemResponse {
    fn from(o: RedeemOutcome) -> Self {
        Self {
            sharing_group_uuid: o.sharing_group_uuid,
            permission: o.permission,
        }
    }
}
