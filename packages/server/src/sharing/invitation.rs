use chrono::{DateTime, Duration, Utc};
use common::{Permission, UserType};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
    TransactionSession, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{SharingService, effective_owning_user_id};
use crate::config::InvitationConfig;
use crate::entity::{sharing_invitation, user};
use crate::error::SyncError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvitation {
    pub sharing_group_uuid: Uuid,
    pub permission: Permission,
    /// Defaults to one.
    pub number_acceptors: Option<i32>,
    #[serde(default)]
    pub allow_social_acceptance: bool,
    /// Seconds until the invitation expires. Defaults to the configured expiry.
    pub expiry_secs: Option<i64>,
}

/// What a prospective redeemer may learn about an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvitationInfo {
    pub sharing_group_uuid: Uuid,
    pub permission: Permission,
    pub allow_social_acceptance: bool,
    pub number_acceptors: i32,
    pub expiry: DateTime<Utc>,
}

impl From<sharing_invitation::Model> for InvitationInfo {
    fn from(inv: sharing_invitation::Model) -> Self {
        Self {
            sharing_group_uuid: inv.sharing_group_uuid,
            permission: inv.permission,
            allow_social_acceptance: inv.allow_social_acceptance,
            number_acceptors: inv.number_acceptors,
            expiry: inv.expiry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedeemOutcome {
    pub sharing_group_uuid: Uuid,
    pub permission: Permission,
}

/// Result of consuming one redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementResult {
    /// Redemptions are left; carries how many.
    Remaining(i32),
    /// That was the last one; the invitation row is gone.
    Exhausted,
    /// The invitation did not exist (or was consumed concurrently).
    Gone,
}

pub struct InvitationService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> InvitationService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Create an invitation into a group the inviter administers.
    pub async fn create_invitation(
        &self,
        inviter: &user::Model,
        request: NewInvitation,
        config: &InvitationConfig,
    ) -> Result<sharing_invitation::Model, SyncError> {
        let membership = SharingService::new(self.conn)
            .require_permission(request.sharing_group_uuid, inviter.id, Permission::Admin)
            .await?;

        let number_acceptors = request.number_acceptors.unwrap_or(1);
        if number_acceptors < 1 || number_acceptors > config.max_acceptors {
            return Err(SyncError::Validation(format!(
                "number_acceptors must be between 1 and {}",
                config.max_acceptors
            )));
        }

        let expiry_secs = request.expiry_secs.unwrap_or(config.default_expiry_secs);
        if expiry_secs <= 0 {
            return Err(SyncError::Validation("expiry_secs must be positive".into()));
        }

        let owning_user_id = effective_owning_user_id(inviter, &membership)?;

        let invitation = sharing_invitation::ActiveModel {
            sharing_invitation_uuid: Set(Uuid::new_v4()),
            owning_user_id: Set(owning_user_id),
            sharing_group_uuid: Set(request.sharing_group_uuid),
            permission: Set(request.permission),
            number_acceptors: Set(number_acceptors),
            allow_social_acceptance: Set(request.allow_social_acceptance),
            expiry: Set(Utc::now() + Duration::seconds(expiry_secs)),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;

        info!(
            invitation = %invitation.sharing_invitation_uuid,
            sharing_group = %invitation.sharing_group_uuid,
            inviter = inviter.id,
            "Sharing invitation created"
        );
        Ok(invitation)
    }

    /// An unexpired invitation.
    pub async fn lookup(&self, invitation_uuid: Uuid) -> Result<Option<sharing_invitation::Model>, DbErr> {
        sharing_invitation::Entity::find_by_id(invitation_uuid)
            .filter(sharing_invitation::Column::Expiry.gt(Utc::now()))
            .one(self.conn)
            .await
    }

    pub async fn invitation_info(&self, invitation_uuid: Uuid) -> Result<InvitationInfo, SyncError> {
        self.lookup(invitation_uuid)
            .await?
            .map(InvitationInfo::from)
            .ok_or_else(|| SyncError::NotFound(format!("Invitation {invitation_uuid} not found")))
    }

    /// Consume one redemption. The row is deleted when none remain.
    pub async fn decrement_acceptors(&self, invitation_uuid: Uuid) -> Result<DecrementResult, DbErr> {
        let decremented = sharing_invitation::Entity::update_many()
            .col_expr(
                sharing_invitation::Column::NumberAcceptors,
                Expr::col(sharing_invitation::Column::NumberAcceptors).sub(1),
            )
            .filter(sharing_invitation::Column::SharingInvitationUuid.eq(invitation_uuid))
            .filter(sharing_invitation::Column::NumberAcceptors.gt(1))
            .exec(self.conn)
            .await?;

        if decremented.rows_affected == 1 {
            let remaining = sharing_invitation::Entity::find_by_id(invitation_uuid)
                .one(self.conn)
                .await?
                .map(|inv| inv.number_acceptors)
                .unwrap_or(0);
            return Ok(DecrementResult::Remaining(remaining));
        }

        let deleted = sharing_invitation::Entity::delete_many()
            .filter(sharing_invitation::Column::SharingInvitationUuid.eq(invitation_uuid))
            .filter(sharing_invitation::Column::NumberAcceptors.eq(1))
            .exec(self.conn)
            .await?;

        if deleted.rows_affected == 1 {
            Ok(DecrementResult::Exhausted)
        } else {
            Ok(DecrementResult::Gone)
        }
    }

    /// Delete expired invitations.
    pub async fn sweep_expired(&self) -> Result<u64, DbErr> {
        let result = sharing_invitation::Entity::delete_many()
            .filter(sharing_invitation::Column::Expiry.lte(Utc::now()))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}

impl<'a, C: ConnectionTrait + TransactionTrait> InvitationService<'a, C> {
    /// Join the invitation's group as `redeemer`.
    ///
    /// Unless the invitation allows social acceptance, only owning users may
    /// redeem it. Sharing users that redeem are attributed to the inviter's
    /// owning user.
    pub async fn redeem(&self, redeemer: &user::Model, invitation_uuid: Uuid) -> Result<RedeemOutcome, SyncError> {
        let swept = self.sweep_expired().await?;
        if swept > 0 {
            debug!(swept, "Expired invitations removed");
        }

        let txn = self.conn.begin().await?;
        let invitations = InvitationService::new(&txn);
        let sharing = SharingService::new(&txn);

        let invitation = invitations
            .lookup(invitation_uuid)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Invitation {invitation_uuid} not found")))?;

        if invitation.owning_user_id == redeemer.id {
            return Err(SyncError::Validation(
                "Cannot redeem an invitation to your own sharing group".into(),
            ));
        }

        sharing.active_group(invitation.sharing_group_uuid).await?;

        if sharing
            .membership(invitation.sharing_group_uuid, redeemer.id)
            .await?
            .is_some()
        {
            return Err(SyncError::Validation(format!(
                "User {} is already a member of sharing group {}",
                redeemer.id, invitation.sharing_group_uuid
            )));
        }

        let redeemer_type = redeemer.account_scheme.user_type();
        if !invitation.allow_social_acceptance && redeemer_type != UserType::Owning {
            return Err(SyncError::PermissionDenied(
                "Invitation can only be redeemed by owning users".into(),
            ));
        }

        match invitations.decrement_acceptors(invitation_uuid).await? {
            DecrementResult::Remaining(_) | DecrementResult::Exhausted => {}
            DecrementResult::Gone => {
                return Err(SyncError::NotFound(format!(
                    "Invitation {invitation_uuid} not found"
                )));
            }
        }

        let owning_user_id = match redeemer_type {
            UserType::Owning => None,
            UserType::Sharing => Some(invitation.owning_user_id),
        };
        sharing
            .add_member(
                invitation.sharing_group_uuid,
                redeemer.id,
                invitation.permission,
                owning_user_id,
            )
            .await?;

        txn.commit().await?;

        info!(
            invitation = %invitation_uuid,
            sharing_group = %invitation.sharing_group_uuid,
            user_id = redeemer.id,
            "Sharing invitation redeemed"
        );
        Ok(RedeemOutcome {
            sharing_group_uuid: invitation.sharing_group_uuid,
            permission: invitation.permission,
        })
    }
}
