use common::UploadState;
use common::storage::CloudStorageError;
use sea_orm::ConnectionTrait;
use tracing::{debug, info};

use crate::account::{AccountManager, UserService, cloud_options};
use crate::entity::{upload, user};
use crate::error::SyncError;
use crate::file_index::{FileIndexKey, FileIndexStore};
use crate::utils::filename::cloud_file_name;

/// Cloud file name a staged first version's content was stored under.
fn staged_content_name(row: &upload::Model) -> String {
    cloud_file_name(row.file_uuid, row.device_uuid, 1, row.mime_type.as_deref())
}

/// Delete the stored content of a staged first version that will never be
/// committed.
///
/// Content already published by the file index under the same name is left
/// alone. Returns whether an object was deleted.
pub(crate) async fn discard_staged_content<C: ConnectionTrait>(
    conn: &C,
    accounts: &dyn AccountManager,
    row: &upload::Model,
) -> Result<bool, SyncError> {
    let Some(owner_id) = row.content_owner_id else {
        return Ok(false);
    };
    if row.state != UploadState::V0UploadCompleteFile {
        return Ok(false);
    }

    let published = FileIndexStore::new(conn)
        .find(FileIndexKey::File {
            sharing_group_uuid: row.sharing_group_uuid,
            file_uuid: row.file_uuid,
        })
        .await?
        .is_some_and(|entry| entry.device_uuid == row.device_uuid);
    if published {
        return Ok(false);
    }

    let Some(owner) = UserService::new(conn).find_by_id(owner_id).await? else {
        debug!(upload_id = row.id, owner_id, "Content owner is gone");
        return Ok(false);
    };
    delete_content(accounts, &owner, row).await
}

async fn delete_content(
    accounts: &dyn AccountManager,
    owner: &user::Model,
    row: &upload::Model,
) -> Result<bool, SyncError> {
    let storage = accounts.cloud_storage(owner).await?;
    let name = staged_content_name(row);
    match storage
        .delete(&name, &cloud_options(owner, row.mime_type.as_deref()))
        .await
    {
        Ok(()) => {
            info!(upload_id = row.id, cloud_name = %name, "Discarded staged content");
            Ok(true)
        }
        Err(CloudStorageError::NotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
