use chrono::{DateTime, Utc};
use common::UploadState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{file_index, upload};
use crate::upload::{CommitOutcome, IndexSnapshot, StageUpload};

/// One file operation of a batch.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StageUploadRequest {
    pub file_uuid: Uuid,
    /// Version of the file the device last observed; 0 for a new file.
    #[schema(example = 0)]
    pub file_version: i64,
    #[schema(value_type = String, example = "v0UploadCompleteFile")]
    pub state: UploadState,
    /// SHA-256 hex of the content. Required for a first version staged without `content`.
    pub checksum: Option<String>,
    #[schema(example = 1)]
    pub upload_index: i32,
    #[schema(example = 1)]
    pub upload_count: i32,
    /// UTF-8 content: the complete file for a first version, the change
    /// record for a `vNUploadFileChange`.
    pub content: Option<String>,
    pub app_meta_data: Option<String>,
    pub file_group_uuid: Option<Uuid>,
    pub object_type: Option<String>,
    #[schema(example = "CommentFile")]
    pub change_resolver_name: Option<String>,
    #[schema(example = "application/json")]
    pub mime_type: Option<String>,
}

impl From<StageUploadRequest> for StageUpload {
    fn from(r: StageUploadRequest) -> Self {
        Self {
            file_uuid: r.file_uuid,
            file_version: r.file_version,
            state: r.state,
            checksum: r.checksum,
            upload_index: r.upload_index,
            upload_count: r.upload_count,
            contents: r.content.map(String::into_bytes),
            app_meta_data: r.app_meta_data,
            file_group_uuid: r.file_group_uuid,
            object_type: r.object_type,
            change_resolver_name: r.change_resolver_name,
            mime_type: r.mime_type,
            content_owner_id: None,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    pub id: i32,
    pub file_uuid: Uuid,
    pub file_version: i64,
    #[schema(value_type = String, example = "v0UploadCompleteFile")]
    pub state: UploadState,
    pub checksum: Option<String>,
    pub upload_index: i32,
    pub upload_count: i32,
}

impl From<upload::Model> for UploadResponse {
    fn from(m: upload::Model) -> Self {
        Self {
            id: m.id,
            file_uuid: m.file_uuid,
            file_version: m.file_version,
            state: m.state,
            checksum: m.checksum,
            upload_index: m.upload_index,
            upload_count: m.upload_count,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AbandonResponse {
    /// Staged uploads removed.
    pub removed: u64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CommitRequestBody {
    /// Master version the device last observed.
    #[schema(example = 0)]
    pub master_version: i64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommitResponse {
    Committed {
        master_version: i64,
        deferred_upload_id: Option<i32>,
        number_committed: usize,
    },
    /// The group moved on; refetch the index and retry.
    MasterVersionUpdate { master_version: i64 },
}

impl From<CommitOutcome> for CommitResponse {
    fn from(outcome: CommitOutcome) -> Self {
        match outcome {
            CommitOutcome::Committed(summary) => Self::Committed {
                master_version: summary.master_version,
                deferred_upload_id: summary.deferred_upload_id,
                number_committed: summary.number_committed,
            },
            CommitOutcome::MasterVersionUpdate(master_version) => {
                Self::MasterVersionUpdate { master_version }
            }
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FileIndexEntry {
    pub file_uuid: Uuid,
    /// Device that uploaded the first version.
    pub device_uuid: Uuid,
    pub owning_user_id: i32,
    pub file_version: i64,
    pub deleted: bool,
    /// `null` while a change to the current version is being merged.
    pub checksum: Option<String>,
    pub mime_type: Option<String>,
    pub app_meta_data: Option<String>,
    pub file_group_uuid: Option<Uuid>,
    pub object_type: Option<String>,
    pub change_resolver_name: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl From<file_index::Model> for FileIndexEntry {
    fn from(m: file_index::Model) -> Self {
        Self {
            file_uuid: m.file_uuid,
            device_uuid: m.device_uuid,
            owning_user_id: m.owning_user_id,
            file_version: m.file_version,
            deleted: m.deleted,
            checksum: m.checksum,
            mime_type: m.mime_type,
            app_meta_data: m.app_meta_data,
            file_group_uuid: m.file_group_uuid,
            object_type: m.object_type,
            change_resolver_name: m.change_resolver_name,
            creation_date: m.creation_date,
            update_date: m.update_date,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct IndexResponse {
    pub master_version: i64,
    pub files: Vec<FileIndexEntry>,
}

impl From<IndexSnapshot> for IndexResponse {
    fn from(s: IndexSnapshot) -> Self {
        Self {
            master_version: s.master_version,
            files: s.files.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VersionResponse {
    pub master_version: i64,
}
