use common::UploadState;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A staged file operation, one of `upload_count` in a device's batch.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub file_uuid: Uuid,
    pub device_uuid: Uuid,

    pub user_id: i32,
    #[sea_orm(belongs_to, from = "user_id", to = "id")]
    pub user: HasOne<super::user::Entity>,

    pub sharing_group_uuid: Uuid,
    #[sea_orm(belongs_to, from = "sharing_group_uuid", to = "sharing_group_uuid")]
    pub sharing_group: HasOne<super::sharing_group::Entity>,

    /// Version of the file the device last observed; 0 for a new file.
    pub file_version: i64,

    pub state: UploadState,

    /// Required for `v0UploadCompleteFile`.
    pub checksum: Option<String>,

    pub upload_index: i32,
    pub upload_count: i32,

    /// Set once the row is committed and waiting for the reconciliation worker.
    #[sea_orm(indexed)]
    pub deferred_upload_id: Option<i32>,
    #[sea_orm(belongs_to, from = "deferred_upload_id", to = "id")]
    pub deferred_upload: HasOne<super::deferred_upload::Entity>,

    /// Change record for `vNUploadFileChange`.
    #[serde(skip)]
    pub upload_contents: Option<Vec<u8>>,

    #[sea_orm(column_type = "Text", nullable)]
    pub app_meta_data: Option<String>,
    pub file_group_uuid: Option<Uuid>,
    pub object_type: Option<String>,
    pub change_resolver_name: Option<String>,
    pub mime_type: Option<String>,

    /// User whose cloud storage already holds the content of a
    /// `v0UploadCompleteFile` sent with the upload.
    pub content_owner_id: Option<i32>,

    #[sea_orm(indexed)]
    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
