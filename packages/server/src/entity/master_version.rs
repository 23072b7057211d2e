use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "master_version")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub sharing_group_uuid: Uuid,
    #[sea_orm(belongs_to, from = "sharing_group_uuid", to = "sharing_group_uuid")]
    pub sharing_group: HasOne<super::sharing_group::Entity>,

    pub master_version: i64,
}

impl ActiveModelBehavior for ActiveModel {}
