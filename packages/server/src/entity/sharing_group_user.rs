use common::Permission;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sharing_group_user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub sharing_group_uuid: Uuid,
    #[sea_orm(primary_key)]
    pub user_id: i32,
    #[sea_orm(belongs_to, from = "sharing_group_uuid", to = "sharing_group_uuid")]
    pub sharing_group: HasOne<super::sharing_group::Entity>,
    #[sea_orm(belongs_to, from = "user_id", to = "id")]
    pub user: HasOne<super::user::Entity>,

    pub permission: Permission,

    /// Set for sharing users: the owning user whose storage holds their files.
    /// NULL for owning users.
    pub owning_user_id: Option<i32>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
