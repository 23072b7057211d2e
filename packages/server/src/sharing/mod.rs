//! Sharing groups, their members, and invitations into them.

mod group;
mod invitation;

pub use group::{GroupSummary, LeaveOutcome, SharingService};
pub use invitation::{
    DecrementResult, InvitationInfo, InvitationService, NewInvitation, RedeemOutcome,
};

use common::UserType;

use crate::entity::{sharing_group_user, user};
use crate::error::SyncError;

/// The owning user whose cloud storage holds the files `member` uploads.
///
/// Owning users store their own files. Sharing users store into the
/// storage of the owning user recorded on their membership.
pub fn effective_owning_user_id(
    member: &user::Model,
    membership: &sharing_group_user::Model,
) -> Result<i32, SyncError> {
    match member.account_scheme.user_type() {
        UserType::Owning => Ok(member.id),
        UserType::Sharing => membership.owning_user_id.ok_or_else(|| {
            SyncError::Validation(format!(
                "User {} has no owning user in sharing group {}",
                member.id, membership.sharing_group_uuid
            ))
        }),
    }
}
