use common::Permission;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sharing_invitation")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub sharing_invitation_uuid: Uuid,

    /// Owning user that redeemed sharing users will be attributed to.
    pub owning_user_id: i32,
    #[sea_orm(belongs_to, from = "owning_user_id", to = "id")]
    pub owning_user: HasOne<super::user::Entity>,

    pub sharing_group_uuid: Uuid,
    #[sea_orm(belongs_to, from = "sharing_group_uuid", to = "sharing_group_uuid")]
    pub sharing_group: HasOne<super::sharing_group::Entity>,

    pub permission: Permission,

    /// Remaining redemptions. A row never exists with zero remaining.
    pub number_acceptors: i32,

    pub allow_social_acceptance: bool,

    #[sea_orm(indexed)]
    pub expiry: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
