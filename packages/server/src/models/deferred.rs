use chrono::{DateTime, Utc};
use common::DeferredUploadStatus;
use serde::Serialize;
use uuid::Uuid;

use crate::entity::deferred_upload;

/// Status of a deferred upload, for client polling.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DeferredUploadResponse {
    #[schema(example = 1)]
    pub id: i32,
    pub sharing_group_uuid: Uuid,
    pub file_group_uuid: Option<Uuid>,
    #[schema(value_type = String, example = "pendingChange")]
    pub status: DeferredUploadStatus,
    #[schema(example = "CLOUD_FAILURE")]
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[schema(example = 0)]
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<deferred_upload::Model> for DeferredUploadResponse {
    fn from(m: deferred_upload::Model) -> Self {
        Self {
            id: m.id,
            sharing_group_uuid: m.sharing_group_uuid,
            file_group_uuid: m.file_group_uuid,
            status: m.status,
            error_code: m.error_code,
            error_message: m.error_message,
            attempts: m.attempts,
            next_attempt_at: m.next_attempt_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
