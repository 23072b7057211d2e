use chrono::Duration;
use common::resolver::ResolverRegistry;
use common::storage::{CloudStorageError, ContentHash};
use common::{Permission, UploadState};
use sea_orm::ConnectionTrait;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::content::discard_staged_content;
use super::staging::{BatchKey, StageUpload, StagingStore};
use crate::account::{AccountManager, UserService, cloud_options};
use crate::entity::{file_index, upload, user};
use crate::error::SyncError;
use crate::file_index::{FileIndexKey, FileIndexStore};
use crate::lock::{LockManager, new_holder, sharing_group_lock_name, staging_lock_name};
use crate::master_version::MasterVersionStore;
use crate::sharing::{SharingService, effective_owning_user_id};
use crate::utils::filename::cloud_file_name;

const DEFAULT_LOCK_EXPIRY_SECS: i64 = 300;

/// Snapshot a device resynchronises from.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSnapshot {
    pub master_version: i64,
    /// Every file of the group, tombstones included.
    pub files: Vec<file_index::Model>,
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub contents: Vec<u8>,
    pub checksum: String,
    pub file_version: i64,
    pub mime_type: Option<String>,
}

/// File operations of one user, checked against their group permissions.
pub struct FileService<'a, C: ConnectionTrait> {
    conn: &'a C,
    accounts: &'a dyn AccountManager,
    resolvers: &'a ResolverRegistry,
    lock_expiry: Duration,
}

impl<'a, C: ConnectionTrait> FileService<'a, C> {
    pub fn new(conn: &'a C, accounts: &'a dyn AccountManager, resolvers: &'a ResolverRegistry) -> Self {
        Self {
            conn,
            accounts,
            resolvers,
            lock_expiry: Duration::seconds(DEFAULT_LOCK_EXPIRY_SECS),
        }
    }

    /// Expiry of the staging and commit locks this service takes.
    pub fn with_lock_expiry(mut self, lock_expiry: Duration) -> Self {
        self.lock_expiry = lock_expiry;
        self
    }

    /// Stage an operation whose content, if any, is already settled.
    pub async fn stage_upload(
        &self,
        user: &user::Model,
        device_uuid: Uuid,
        sharing_group_uuid: Uuid,
        request: StageUpload,
    ) -> Result<upload::Model, SyncError> {
        SharingService::new(self.conn)
            .require_permission(sharing_group_uuid, user.id, Permission::Write)
            .await?;

        StagingStore::new(self.conn)
            .stage(batch_key(user, device_uuid, sharing_group_uuid), request, self.resolvers)
            .await
    }

    /// Store the first version of a file and stage it.
    ///
    /// The content goes to the effective owning user's cloud storage right
    /// away; the commit only publishes it. Nothing is stored unless the
    /// operation would be staged, and a checksum sent by the client must
    /// match the content.
    pub async fn upload_file(
        &self,
        user: &user::Model,
        device_uuid: Uuid,
        sharing_group_uuid: Uuid,
        mut request: StageUpload,
    ) -> Result<upload::Model, SyncError> {
        if request.state != UploadState::V0UploadCompleteFile {
            return self
                .stage_upload(user, device_uuid, sharing_group_uuid, request)
                .await;
        }

        let membership = SharingService::new(self.conn)
            .require_permission(sharing_group_uuid, user.id, Permission::Write)
            .await?;

        let contents = request
            .contents
            .take()
            .ok_or_else(|| SyncError::Validation("File upload has no contents".into()))?;

        if let Some(name) = &request.change_resolver_name {
            let resolver = self.resolvers.get(name).ok_or_else(|| {
                SyncError::Validation(format!("Unknown change resolver '{name}'"))
            })?;
            resolver.validate_v0(&contents)?;
        }

        let checksum = ContentHash::compute(&contents).to_hex();
        if let Some(claimed) = &request.checksum
            && !claimed.eq_ignore_ascii_case(&checksum)
        {
            return Err(SyncError::Validation(format!(
                "Checksum mismatch for file {}: client sent {claimed}, content hashes to {checksum}",
                request.file_uuid
            )));
        }
        request.checksum = Some(checksum);

        let owner = self
            .owner(effective_owning_user_id(user, &membership)?)
            .await?;

        let lock_name = staging_lock_name(sharing_group_uuid, device_uuid);
        let holder = new_holder(&device_uuid.to_string());
        let locks = LockManager::new(self.conn);
        if !locks.acquire(&lock_name, &holder, self.lock_expiry).await? {
            return Err(SyncError::Busy(format!(
                "Device {device_uuid} is already uploading to sharing group {sharing_group_uuid}"
            )));
        }

        let key = batch_key(user, device_uuid, sharing_group_uuid);
        let result = self.store_and_stage(key, &owner, request, &contents).await;

        if let Err(e) = locks.release_if_held(&lock_name, &holder).await {
            warn!(lock = %lock_name, error = %e, "Failed to release staging lock");
        }
        result
    }

    async fn store_and_stage(
        &self,
        key: BatchKey,
        owner: &user::Model,
        mut request: StageUpload,
        contents: &[u8],
    ) -> Result<upload::Model, SyncError> {
        let staging = StagingStore::new(self.conn);
        if let Some(existing) = staging.find_staged(key, &request, self.resolvers).await? {
            return Ok(existing);
        }

        let exists = FileIndexStore::new(self.conn)
            .find(FileIndexKey::File {
                sharing_group_uuid: key.sharing_group_uuid,
                file_uuid: request.file_uuid,
            })
            .await?
            .is_some();
        if exists {
            return Err(SyncError::FileVersionConflict(format!(
                "File {} already exists",
                request.file_uuid
            )));
        }

        let storage = self.accounts.cloud_storage(owner).await?;
        let name = cloud_file_name(
            request.file_uuid,
            key.device_uuid,
            1,
            request.mime_type.as_deref(),
        );
        let options = cloud_options(owner, request.mime_type.as_deref());
        let stored = storage.upload(&name, contents, &options).await?.to_hex();

        request.content_owner_id = Some(owner.id);
        let staged = if request.checksum.as_deref() == Some(stored.as_str()) {
            staging.insert(key, request).await
        } else {
            Err(SyncError::InvariantViolation(format!(
                "Storage recorded checksum {stored} for {name}"
            )))
        };

        match staged {
            Ok(row) => {
                info!(file = %row.file_uuid, owner = owner.id, cloud_name = %name, "File content stored");
                Ok(row)
            }
            Err(e) => {
                if let Err(cleanup) = storage.delete(&name, &options).await {
                    warn!(cloud_name = %name, error = %cleanup, "Failed to remove unstaged content");
                }
                Err(e)
            }
        }
    }

    /// Drop the device's uncommitted batch and any content stored for it.
    ///
    /// Takes the sharing group lock so a concurrent commit cannot publish
    /// content that is being removed.
    pub async fn abandon(
        &self,
        user: &user::Model,
        device_uuid: Uuid,
        sharing_group_uuid: Uuid,
    ) -> Result<u64, SyncError> {
        SharingService::new(self.conn)
            .require_permission(sharing_group_uuid, user.id, Permission::Write)
            .await?;

        let lock_name = sharing_group_lock_name(sharing_group_uuid);
        let holder = new_holder(&device_uuid.to_string());
        let locks = LockManager::new(self.conn);
        if !locks.acquire(&lock_name, &holder, self.lock_expiry).await? {
            return Err(SyncError::Busy(format!(
                "Sharing group {sharing_group_uuid} is being committed to"
            )));
        }

        let result = self.abandon_locked(device_uuid, sharing_group_uuid).await;

        if let Err(e) = locks.release_if_held(&lock_name, &holder).await {
            warn!(lock = %lock_name, error = %e, "Failed to release commit lock");
        }
        result
    }

    async fn abandon_locked(&self, device_uuid: Uuid, sharing_group_uuid: Uuid) -> Result<u64, SyncError> {
        let removed = StagingStore::new(self.conn)
            .abandon(device_uuid, sharing_group_uuid)
            .await?;
        for row in &removed {
            if let Err(e) = discard_staged_content(self.conn, self.accounts, row).await {
                warn!(upload_id = row.id, error = %e, "Failed to discard staged content");
            }
        }
        debug!(device = %device_uuid, removed = removed.len(), "Staged uploads abandoned");
        Ok(removed.len() as u64)
    }

    /// Current content of a file.
    ///
    /// A file whose latest change is still being merged reports `Busy`.
    pub async fn download_file(
        &self,
        user: &user::Model,
        sharing_group_uuid: Uuid,
        file_uuid: Uuid,
    ) -> Result<DownloadedFile, SyncError> {
        SharingService::new(self.conn)
            .require_permission(sharing_group_uuid, user.id, Permission::Read)
            .await?;

        let entry = FileIndexStore::new(self.conn)
            .find(FileIndexKey::File {
                sharing_group_uuid,
                file_uuid,
            })
            .await?
            .filter(|entry| !entry.deleted)
            .ok_or_else(|| SyncError::NotFound(format!("File {file_uuid} not found")))?;

        let Some(checksum) = entry.checksum.clone() else {
            return Err(SyncError::Busy(format!(
                "File {file_uuid} version {} is still being merged",
                entry.file_version
            )));
        };

        let owner = self.owner(entry.owning_user_id).await?;
        let storage = self.accounts.cloud_storage(&owner).await?;
        let name = cloud_file_name(
            entry.file_uuid,
            entry.device_uuid,
            entry.file_version,
            entry.mime_type.as_deref(),
        );
        let contents = storage
            .download(&name, &cloud_options(&owner, entry.mime_type.as_deref()))
            .await
            .map_err(|e| match e {
                CloudStorageError::NotFound(_) => SyncError::NotFound(format!(
                    "Content of file {file_uuid} version {} is missing",
                    entry.file_version
                )),
                other => other.into(),
            })?;

        Ok(DownloadedFile {
            contents,
            checksum,
            file_version: entry.file_version,
            mime_type: entry.mime_type,
        })
    }

    pub async fn index(&self, user: &user::Model, sharing_group_uuid: Uuid) -> Result<IndexSnapshot, SyncError> {
        SharingService::new(self.conn)
            .require_permission(sharing_group_uuid, user.id, Permission::Read)
            .await?;

        let master_version = self.master_version(sharing_group_uuid).await?;
        let files = FileIndexStore::new(self.conn)
            .list(sharing_group_uuid)
            .await?;
        Ok(IndexSnapshot {
            master_version,
            files,
        })
    }

    pub async fn current_version(&self, user: &user::Model, sharing_group_uuid: Uuid) -> Result<i64, SyncError> {
        SharingService::new(self.conn)
            .require_permission(sharing_group_uuid, user.id, Permission::Read)
            .await?;
        self.master_version(sharing_group_uuid).await
    }

    async fn master_version(&self, sharing_group_uuid: Uuid) -> Result<i64, SyncError> {
        MasterVersionStore::new(self.conn)
            .current(sharing_group_uuid)
            .await?
            .ok_or_else(|| {
                SyncError::InvariantViolation(format!(
                    "Sharing group {sharing_group_uuid} has no master version"
                ))
            })
    }

    async fn owner(&self, owning_user_id: i32) -> Result<user::Model, SyncError> {
        UserService::new(self.conn)
            .find_by_id(owning_user_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Owning user {owning_user_id} not found")))
    }
}

fn batch_key(user: &user::Model, device_uuid: Uuid, sharing_group_uuid: Uuid) -> BatchKey {
    BatchKey {
        user_id: user.id,
        device_uuid,
        sharing_group_uuid,
    }
}
