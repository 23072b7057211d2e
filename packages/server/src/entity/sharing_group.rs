use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A collaboration scope. Rows are soft-deleted, never removed.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sharing_group")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub sharing_group_uuid: Uuid,

    pub name: Option<String>,

    #[sea_orm(default_value = false)]
    pub deleted: bool,

    #[sea_orm(has_many)]
    pub members: HasMany<super::sharing_group_user::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
