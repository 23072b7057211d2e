use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Authoritative state of one file in a sharing group.
///
/// Deleted files stay as tombstones with `deleted = true`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_index")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub file_uuid: Uuid,

    pub sharing_group_uuid: Uuid,
    #[sea_orm(belongs_to, from = "sharing_group_uuid", to = "sharing_group_uuid")]
    pub sharing_group: HasOne<super::sharing_group::Entity>,

    /// Device that uploaded the first version; part of every cloud file name.
    pub device_uuid: Uuid,

    /// User whose cloud storage holds the file.
    pub owning_user_id: i32,
    #[sea_orm(belongs_to, from = "owning_user_id", to = "id")]
    pub owning_user: HasOne<super::user::Entity>,

    pub file_version: i64,

    #[sea_orm(default_value = false)]
    pub deleted: bool,

    pub checksum: Option<String>,
    pub mime_type: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub app_meta_data: Option<String>,
    pub file_group_uuid: Option<Uuid>,
    pub object_type: Option<String>,
    pub change_resolver_name: Option<String>,

    pub creation_date: DateTimeUtc,
    pub update_date: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
