use common::DeferredUploadStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Content reconciliation queued by a commit.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deferred_upload")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// User whose commit created the row.
    pub user_id: i32,
    #[sea_orm(belongs_to, from = "user_id", to = "id")]
    pub user: HasOne<super::user::Entity>,

    pub sharing_group_uuid: Uuid,
    #[sea_orm(belongs_to, from = "sharing_group_uuid", to = "sharing_group_uuid")]
    pub sharing_group: HasOne<super::sharing_group::Entity>,

    pub file_group_uuid: Option<Uuid>,

    #[sea_orm(indexed)]
    pub status: DeferredUploadStatus,

    /// Machine-readable code of the last failure (MERGE_FAILED, CLOUD_FAILURE, etc.).
    pub error_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Failed processing attempts so far.
    pub attempts: i32,
    /// Earliest time the periodic scan retries a failed row.
    pub next_attempt_at: Option<DateTimeUtc>,

    #[sea_orm(has_many)]
    pub uploads: HasMany<super::upload::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
