use chrono::{DateTime, Utc};
use common::UploadState;
use common::resolver::ResolverRegistry;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::entity::upload;
use crate::error::SyncError;

/// One file operation of a device's batch, as sent by the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageUpload {
    pub file_uuid: Uuid,
    /// Version of the file the device last observed; 0 for a new file.
    pub file_version: i64,
    pub state: UploadState,
    pub checksum: Option<String>,
    /// 1-based position of this operation in the batch.
    pub upload_index: i32,
    pub upload_count: i32,
    /// Change record of a `vNUploadFileChange`.
    #[serde(skip)]
    pub contents: Option<Vec<u8>>,
    pub app_meta_data: Option<String>,
    pub file_group_uuid: Option<Uuid>,
    pub object_type: Option<String>,
    pub change_resolver_name: Option<String>,
    pub mime_type: Option<String>,
    /// Set by the server once it has stored the content of a first version.
    #[serde(skip)]
    pub content_owner_id: Option<i32>,
}

impl StageUpload {
    /// Reject uploads missing the fields their state requires.
    pub fn validate(&self, resolvers: &ResolverRegistry) -> Result<(), SyncError> {
        if self.upload_count < 1 {
            return Err(SyncError::Validation("upload_count must be at least 1".into()));
        }
        if self.upload_index < 1 || self.upload_index > self.upload_count {
            return Err(SyncError::Validation(format!(
                "upload_index {} outside 1..={}",
                self.upload_index, self.upload_count
            )));
        }
        if self.upload_count > 1 && self.file_group_uuid.is_none() {
            return Err(SyncError::Validation(
                "Batches of more than one upload need a file_group_uuid".into(),
            ));
        }
        if self.file_version < 0 {
            return Err(SyncError::Validation("file_version must not be negative".into()));
        }
        if self.change_resolver_name.is_some() && self.state != UploadState::V0UploadCompleteFile {
            return Err(SyncError::Validation(
                "change_resolver_name can only be set on the first version of a file".into(),
            ));
        }

        match self.state {
            UploadState::V0UploadCompleteFile => {
                if self.checksum.as_deref().is_none_or(str::is_empty) {
                    return Err(SyncError::Validation(
                        "v0UploadCompleteFile requires a checksum".into(),
                    ));
                }
                if self.file_version != 0 {
                    return Err(SyncError::Validation(
                        "v0UploadCompleteFile requires file_version 0".into(),
                    ));
                }
                if let Some(name) = &self.change_resolver_name
                    && !resolvers.contains(name)
                {
                    return Err(SyncError::Validation(format!(
                        "Unknown change resolver '{name}'"
                    )));
                }
            }
            UploadState::VNUploadFileChange => {
                if self.contents.as_ref().is_none_or(Vec::is_empty) {
                    return Err(SyncError::Validation(
                        "vNUploadFileChange requires change contents".into(),
                    ));
                }
                if self.file_version < 1 {
                    return Err(SyncError::Validation(
                        "vNUploadFileChange requires file_version of at least 1".into(),
                    ));
                }
            }
            UploadState::DeleteSingleFile => {
                if self.file_version < 1 {
                    return Err(SyncError::Validation(
                        "deleteSingleFile requires file_version of at least 1".into(),
                    ));
                }
            }
            UploadState::Uploaded => {
                return Err(SyncError::Validation(format!(
                    "State {} cannot be staged",
                    self.state
                )));
            }
        }

        Ok(())
    }

    fn same_as(&self, row: &upload::Model) -> bool {
        row.file_uuid == self.file_uuid
            && row.file_version == self.file_version
            && row.state == self.state
            && row.checksum == self.checksum
            && row.upload_index == self.upload_index
            && row.upload_count == self.upload_count
            && row.upload_contents == self.contents
            && row.file_group_uuid == self.file_group_uuid
    }
}

/// Where staged rows of one batch live.
#[derive(Debug, Clone, Copy)]
pub struct BatchKey {
    pub user_id: i32,
    pub device_uuid: Uuid,
    pub sharing_group_uuid: Uuid,
}

/// Pending, uncommitted file operations per device and sharing group.
pub struct StagingStore<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> StagingStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Stage one file operation.
    ///
    /// Staging the same operation again returns the existing row, so clients
    /// can retry after a lost response.
    pub async fn stage(
        &self,
        key: BatchKey,
        request: StageUpload,
        resolvers: &ResolverRegistry,
    ) -> Result<upload::Model, SyncError> {
        if let Some(existing) = self.find_staged(key, &request, resolvers).await? {
            return Ok(existing);
        }
        self.insert(key, request).await
    }

    /// Validate `request` against the rows already staged for its batch.
    ///
    /// Returns the staged row when the same operation is already staged, and
    /// `Validation` when its file or position is taken by another operation.
    pub async fn find_staged(
        &self,
        key: BatchKey,
        request: &StageUpload,
        resolvers: &ResolverRegistry,
    ) -> Result<Option<upload::Model>, SyncError> {
        request.validate(resolvers)?;
        self.clashing(key, request).await
    }

    /// Insert a validated operation.
    ///
    /// Losing a race against an identical operation returns the winner's row.
    pub async fn insert(&self, key: BatchKey, request: StageUpload) -> Result<upload::Model, SyncError> {
        let row = upload::ActiveModel {
            file_uuid: Set(request.file_uuid),
            device_uuid: Set(key.device_uuid),
            user_id: Set(key.user_id),
            sharing_group_uuid: Set(key.sharing_group_uuid),
            file_version: Set(request.file_version),
            state: Set(request.state),
            checksum: Set(request.checksum.clone()),
            upload_index: Set(request.upload_index),
            upload_count: Set(request.upload_count),
            deferred_upload_id: Set(None),
            upload_contents: Set(request.contents.clone()),
            app_meta_data: Set(request.app_meta_data.clone()),
            file_group_uuid: Set(request.file_group_uuid),
            object_type: Set(request.object_type.clone()),
            change_resolver_name: Set(request.change_resolver_name.clone()),
            mime_type: Set(request.mime_type.clone()),
            content_owner_id: Set(request.content_owner_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let row = match row.insert(self.conn).await {
            Ok(row) => row,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return self.clashing(key, &request).await?.ok_or_else(|| {
                    SyncError::Validation(format!(
                        "File {} or upload_index {} was staged concurrently",
                        request.file_uuid, request.upload_index
                    ))
                });
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            upload_id = row.id,
            file = %row.file_uuid,
            index = row.upload_index,
            count = row.upload_count,
            "Upload staged"
        );
        Ok(row)
    }

    async fn clashing(&self, key: BatchKey, request: &StageUpload) -> Result<Option<upload::Model>, SyncError> {
        let clashing = upload::Entity::find()
            .filter(upload::Column::DeviceUuid.eq(key.device_uuid))
            .filter(upload::Column::SharingGroupUuid.eq(key.sharing_group_uuid))
            .filter(upload::Column::DeferredUploadId.is_null())
            .filter(
                Condition::any()
                    .add(upload::Column::FileUuid.eq(request.file_uuid))
                    .add(upload::Column::UploadIndex.eq(request.upload_index)),
            )
            .all(self.conn)
            .await?;

        let Some(existing) = clashing.first() else {
            return Ok(None);
        };
        if clashing.len() == 1 && existing.user_id == key.user_id && request.same_as(existing) {
            debug!(upload_id = existing.id, "Upload already staged");
            return Ok(Some(existing.clone()));
        }
        Err(SyncError::Validation(format!(
            "File {} or upload_index {} is already staged with different content",
            request.file_uuid, request.upload_index
        )))
    }

    /// Uncommitted rows of a device's batch, in upload order.
    pub async fn select_batch(
        &self,
        device_uuid: Uuid,
        sharing_group_uuid: Uuid,
    ) -> Result<Vec<upload::Model>, DbErr> {
        upload::Entity::find()
            .filter(upload::Column::DeviceUuid.eq(device_uuid))
            .filter(upload::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .filter(upload::Column::DeferredUploadId.is_null())
            .order_by_asc(upload::Column::UploadIndex)
            .all(self.conn)
            .await
    }

    /// Drop a device's uncommitted batch, returning the removed rows.
    pub async fn abandon(&self, device_uuid: Uuid, sharing_group_uuid: Uuid) -> Result<Vec<upload::Model>, DbErr> {
        let rows = self.select_batch(device_uuid, sharing_group_uuid).await?;
        self.delete(rows.iter().map(|row| row.id).collect()).await?;
        Ok(rows)
    }

    /// Uncommitted rows staged before `cutoff`.
    pub async fn abandoned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<upload::Model>, DbErr> {
        upload::Entity::find()
            .filter(upload::Column::DeferredUploadId.is_null())
            .filter(upload::Column::CreatedAt.lt(cutoff))
            .order_by_asc(upload::Column::Id)
            .all(self.conn)
            .await
    }

    /// Delete rows by id; used by a commit once their operations are applied.
    pub async fn delete(&self, ids: Vec<i32>) -> Result<u64, DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = upload::Entity::delete_many()
            .filter(upload::Column::Id.is_in(ids))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
