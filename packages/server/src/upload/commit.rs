//! The commit protocol: applying a device's staged batch to the file index.
//!
//! A commit holds the sharing group lock for its whole duration and runs in
//! one transaction. The master version moves exactly once per commit, and
//! only when every operation of the batch applies.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use common::{Permission, UploadState};
use sea_orm::{ConnectionTrait, Set, TransactionSession, TransactionTrait};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::staging::StagingStore;
use crate::deferred::{DeferredUploadService, WorkerHandle};
use crate::entity::{file_index, upload, user};
use crate::error::SyncError;
use crate::file_index::{FileIndexKey, FileIndexStore, FileIndexUpdate};
use crate::lock::{LockManager, new_holder, sharing_group_lock_name};
use crate::master_version::MasterVersionStore;
use crate::sharing::{SharingService, effective_owning_user_id};

#[derive(Debug, Clone, Copy)]
pub struct CommitRequest {
    pub sharing_group_uuid: Uuid,
    pub device_uuid: Uuid,
    /// Master version the device last observed.
    pub master_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Master version after the commit.
    pub master_version: i64,
    /// Set when content changes were queued for the reconciliation worker.
    pub deferred_upload_id: Option<i32>,
    pub number_committed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitSummary),
    /// The group moved on. The device has to refetch the index and retry.
    MasterVersionUpdate(i64),
}

pub struct CommitService<'a, C: ConnectionTrait + TransactionTrait> {
    conn: &'a C,
    lock_expiry: Duration,
    worker: Option<&'a WorkerHandle>,
}

impl<'a, C: ConnectionTrait + TransactionTrait> CommitService<'a, C> {
    pub fn new(conn: &'a C, lock_expiry: Duration) -> Self {
        Self {
            conn,
            lock_expiry,
            worker: None,
        }
    }

    /// Signal `worker` whenever a commit queues a deferred upload.
    pub fn with_worker(mut self, worker: &'a WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Commit the device's staged batch.
    ///
    /// Returns `SyncError::Busy` without waiting when another commit to the
    /// same group holds the lock.
    #[instrument(skip(self, committer), fields(user_id = committer.id, sharing_group = %request.sharing_group_uuid))]
    pub async fn commit(&self, committer: &user::Model, request: CommitRequest) -> Result<CommitOutcome, SyncError> {
        let lock_name = sharing_group_lock_name(request.sharing_group_uuid);
        let holder = new_holder(&request.device_uuid.to_string());
        let locks = LockManager::new(self.conn);

        if !locks.acquire(&lock_name, &holder, self.lock_expiry).await? {
            debug!(lock = %lock_name, "Commit lock busy");
            return Err(SyncError::Busy(format!(
                "Sharing group {} is being committed to",
                request.sharing_group_uuid
            )));
        }

        let result = self.commit_locked(committer, request).await;

        match locks.release_if_held(&lock_name, &holder).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %lock_name, "Commit lock expired before release"),
            Err(e) => warn!(lock = %lock_name, error = %e, "Failed to release commit lock"),
        }

        if let Ok(CommitOutcome::Committed(CommitSummary {
            deferred_upload_id: Some(id),
            ..
        })) = &result
            && let Some(worker) = self.worker
        {
            debug!(deferred_upload_id = id, "Notifying reconciliation worker");
            worker.notify();
        }

        result
    }

    async fn commit_locked(&self, committer: &user::Model, request: CommitRequest) -> Result<CommitOutcome, SyncError> {
        let txn = self.conn.begin().await?;

        let membership = SharingService::new(&txn)
            .require_permission(request.sharing_group_uuid, committer.id, Permission::Write)
            .await?;

        let versions = MasterVersionStore::new(&txn);
        let current = versions
            .current_for_update(request.sharing_group_uuid)
            .await?
            .ok_or_else(|| {
                SyncError::InvariantViolation(format!(
                    "Sharing group {} has no master version",
                    request.sharing_group_uuid
                ))
            })?;

        if current != request.master_version {
            txn.rollback().await?;
            info!(
                current,
                believed = request.master_version,
                "Master version moved; device must resynchronise"
            );
            return Ok(CommitOutcome::MasterVersionUpdate(current));
        }

        let batch = StagingStore::new(&txn)
            .select_batch(request.device_uuid, request.sharing_group_uuid)
            .await?;
        validate_batch(committer.id, &batch)?;

        let owning_user_id = effective_owning_user_id(committer, &membership)?;
        let index = FileIndexStore::new(&txn);
        let mut deferred_rows = Vec::new();
        let mut deferred_group = None;
        let mut applied_rows = Vec::new();

        for row in &batch {
            let entry = apply_upload(&index, row, owning_user_id).await?;
            match row.state {
                UploadState::VNUploadFileChange | UploadState::DeleteSingleFile => {
                    deferred_rows.push(row.id);
                    deferred_group = deferred_group.or(entry.file_group_uuid);
                }
                _ => applied_rows.push(row.id),
            }
        }

        let deferred_upload_id = if deferred_rows.is_empty() {
            None
        } else {
            let deferred = DeferredUploadService::new(&txn);
            let created = deferred
                .create(committer.id, request.sharing_group_uuid, deferred_group)
                .await?;
            deferred.link_uploads(created.id, deferred_rows).await?;
            Some(created.id)
        };

        if !versions.advance(request.sharing_group_uuid, current).await? {
            error!(
                current,
                "Master version changed while the commit lock was held"
            );
            txn.rollback().await?;
            return Err(SyncError::InvariantViolation(format!(
                "Could not advance master version of {} from {current}",
                request.sharing_group_uuid
            )));
        }

        StagingStore::new(&txn).delete(applied_rows).await?;

        txn.commit().await?;

        let summary = CommitSummary {
            master_version: current + 1,
            deferred_upload_id,
            number_committed: batch.len(),
        };
        info!(
            master_version = summary.master_version,
            number_committed = summary.number_committed,
            deferred_upload_id = ?summary.deferred_upload_id,
            "Batch committed"
        );
        Ok(CommitOutcome::Committed(summary))
    }
}

/// A batch is committable when it belongs to the committer, is complete
/// and consistent about its size and file group.
fn validate_batch(user_id: i32, batch: &[upload::Model]) -> Result<(), SyncError> {
    let Some(first) = batch.first() else {
        return Err(SyncError::Validation("No uploads staged for this device".into()));
    };

    if batch.iter().any(|row| row.user_id != user_id) {
        return Err(SyncError::Validation(
            "Staged uploads of this device belong to another user".into(),
        ));
    }

    let count = first.upload_count;
    if batch.iter().any(|row| row.upload_count != count) {
        return Err(SyncError::Validation(
            "Staged uploads disagree on upload_count".into(),
        ));
    }
    if batch
        .iter()
        .any(|row| row.file_group_uuid != first.file_group_uuid)
    {
        return Err(SyncError::Validation(
            "Staged uploads disagree on file_group_uuid".into(),
        ));
    }

    let indexes: BTreeSet<i32> = batch.iter().map(|row| row.upload_index).collect();
    let expected: BTreeSet<i32> = (1..=count).collect();
    if indexes != expected || batch.len() != count as usize {
        return Err(SyncError::Validation(format!(
            "Incomplete batch: {} of {count} uploads staged",
            indexes.len()
        )));
    }

    Ok(())
}

/// Apply one staged operation to the index, returning the entry it was
/// applied to as it was before the operation.
async fn apply_upload(
    index: &FileIndexStore<'_, impl ConnectionTrait>,
    row: &upload::Model,
    owning_user_id: i32,
) -> Result<file_index::Model, SyncError> {
    let existing = index
        .find(FileIndexKey::File {
            sharing_group_uuid: row.sharing_group_uuid,
            file_uuid: row.file_uuid,
        })
        .await?;
    let now = Utc::now();

    match row.state {
        UploadState::V0UploadCompleteFile => {
            if existing.is_some() {
                return Err(SyncError::FileVersionConflict(format!(
                    "File {} already exists",
                    row.file_uuid
                )));
            }
            let inserted = index
                .insert(file_index::ActiveModel {
                    file_uuid: Set(row.file_uuid),
                    sharing_group_uuid: Set(row.sharing_group_uuid),
                    device_uuid: Set(row.device_uuid),
                    owning_user_id: Set(owning_user_id),
                    file_version: Set(1),
                    deleted: Set(false),
                    checksum: Set(row.checksum.clone()),
                    mime_type: Set(row.mime_type.clone()),
                    app_meta_data: Set(row.app_meta_data.clone()),
                    file_group_uuid: Set(row.file_group_uuid),
                    object_type: Set(row.object_type.clone()),
                    change_resolver_name: Set(row.change_resolver_name.clone()),
                    creation_date: Set(now),
                    update_date: Set(now),
                    ..Default::default()
                })
                .await?;
            Ok(inserted)
        }
        UploadState::VNUploadFileChange => {
            let existing = live_version(existing, row)?;
            if existing.change_resolver_name.is_none() {
                return Err(SyncError::Validation(format!(
                    "File {} has no change resolver",
                    row.file_uuid
                )));
            }
            if row.upload_contents.is_none() {
                return Err(SyncError::Validation(format!(
                    "Change to file {} has no contents",
                    row.file_uuid
                )));
            }

            let mut updates = vec![
                FileIndexUpdate::FileVersion(row.file_version + 1),
                FileIndexUpdate::Checksum(None),
                FileIndexUpdate::UpdateDate(now),
            ];
            if row.app_meta_data.is_some() {
                updates.push(FileIndexUpdate::AppMetaData(row.app_meta_data.clone()));
            }
            update_expecting(index, &existing, row, &updates).await?;
            Ok(existing)
        }
        UploadState::DeleteSingleFile => {
            let existing = live_version(existing, row)?;
            let updates = [
                FileIndexUpdate::Deleted(true),
                FileIndexUpdate::FileVersion(row.file_version + 1),
                FileIndexUpdate::UpdateDate(now),
            ];
            update_expecting(index, &existing, row, &updates).await?;
            Ok(existing)
        }
        UploadState::Uploaded => Err(SyncError::Validation(format!(
            "Upload {} is in state {} and cannot be committed",
            row.id, row.state
        ))),
    }
}

/// The index row a change or deletion applies to, at the version the
/// device observed.
fn live_version(
    existing: Option<file_index::Model>,
    row: &upload::Model,
) -> Result<file_index::Model, SyncError> {
    let existing = existing.ok_or_else(|| {
        SyncError::Validation(format!("File {} does not exist", row.file_uuid))
    })?;
    if existing.deleted {
        return Err(SyncError::FileVersionConflict(format!(
            "File {} was deleted",
            row.file_uuid
        )));
    }
    if existing.file_version != row.file_version {
        return Err(SyncError::FileVersionConflict(format!(
            "File {} is at version {}, upload is based on {}",
            row.file_uuid, existing.file_version, row.file_version
        )));
    }
    // Reconciliation locks by file group, so it has to be the file's own.
    if existing.file_group_uuid != row.file_group_uuid {
        return Err(SyncError::Validation(format!(
            "File {} does not belong to file group {:?}",
            row.file_uuid, row.file_group_uuid
        )));
    }
    Ok(existing)
}

async fn update_expecting(
    index: &FileIndexStore<'_, impl ConnectionTrait>,
    existing: &file_index::Model,
    row: &upload::Model,
    updates: &[FileIndexUpdate],
) -> Result<(), SyncError> {
    if !index
        .update_fields(existing.id, Some(row.file_version), updates)
        .await?
    {
        return Err(SyncError::FileVersionConflict(format!(
            "File {} changed during commit",
            row.file_uuid
        )));
    }
    Ok(())
}
