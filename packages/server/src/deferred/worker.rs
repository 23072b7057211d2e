use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::config::DeferredConfig;
use common::resolver::ResolverRegistry;
use common::retry::next_attempt_at;
use common::storage::{CloudFileOptions, CloudStorage, CloudStorageError, ContentHash};
use common::{DeferredErrorCode, UploadState};
use futures::future::join_all;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::DeferredUploadService;
use crate::account::{AccountError, AccountManager, UserService, cloud_options};
use crate::entity::{deferred_upload, file_index, upload};
use crate::file_index::{FileIndexKey, FileIndexStore, FileIndexUpdate};
use crate::lock::{LockManager, file_group_lock_name, file_lock_name, new_holder};
use crate::utils::filename::cloud_file_name;

/// Counts of one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Rows left for a later run because another run held their lock.
    pub skipped_busy: usize,
    /// Ready rows held back behind an older unfinished row of their file
    /// group or file.
    pub blocked: usize,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.skipped_busy += other.skipped_busy;
        self.blocked += other.blocked;
    }
}

/// An unfinished row with its staged operations.
struct Queued {
    row: deferred_upload::Model,
    uploads: Vec<upload::Model>,
    ready: bool,
}

/// Why a deferred upload could not be processed.
#[derive(Debug)]
struct Failure {
    code: DeferredErrorCode,
    message: String,
}

impl Failure {
    fn new(code: DeferredErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CloudStorageError> for Failure {
    fn from(err: CloudStorageError) -> Self {
        let code = if err.is_access_revoked() {
            DeferredErrorCode::AccessRevoked
        } else {
            DeferredErrorCode::CloudFailure
        };
        Self::new(code, err.to_string())
    }
}

impl From<AccountError> for Failure {
    fn from(err: AccountError) -> Self {
        let code = if err.is_reauthentication_required() {
            DeferredErrorCode::AccessRevoked
        } else {
            DeferredErrorCode::CloudFailure
        };
        Self::new(code, err.to_string())
    }
}

impl From<DbErr> for Failure {
    fn from(err: DbErr) -> Self {
        Self::new(DeferredErrorCode::CloudFailure, format!("Database error: {err}"))
    }
}

/// Lock serialising the rows of one file group, or of one file.
fn lock_key(row: &deferred_upload::Model, uploads: &[upload::Model]) -> String {
    match (row.file_group_uuid, uploads.first()) {
        (Some(file_group_uuid), _) => file_group_lock_name(file_group_uuid),
        (None, Some(upload)) => file_lock_name(upload.file_uuid),
        (None, None) => format!("deferred-upload:{}", row.id),
    }
}

/// Applies committed content changes and deletions to cloud storage.
///
/// The index already carries the versions the commit allocated; the worker
/// writes the matching objects and records the merged checksum.
#[derive(Clone)]
pub struct ReconciliationWorker {
    db: DatabaseConnection,
    accounts: Arc<dyn AccountManager>,
    resolvers: Arc<ResolverRegistry>,
    config: DeferredConfig,
}

impl ReconciliationWorker {
    pub fn new(
        db: DatabaseConnection,
        accounts: Arc<dyn AccountManager>,
        resolvers: Arc<ResolverRegistry>,
        config: DeferredConfig,
    ) -> Self {
        Self {
            db,
            accounts,
            resolvers,
            config,
        }
    }

    /// Process every row that is ready now.
    ///
    /// Rows of different file groups run concurrently. Rows of the same file
    /// group run one after the other in creation order, and stop at the first
    /// row that fails or is not ready, so later changes never overtake it.
    pub async fn run_once(&self) -> Result<RunSummary, DbErr> {
        let service = DeferredUploadService::new(&self.db);
        let ready: HashSet<i32> = service
            .pending_ready(Utc::now(), self.config.max_attempts)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if ready.is_empty() {
            return Ok(RunSummary::default());
        }

        let mut groups: BTreeMap<String, Vec<Queued>> = BTreeMap::new();
        for row in service.unfinished().await? {
            let uploads = service.uploads_for(row.id).await?;
            let ready = ready.contains(&row.id);
            groups
                .entry(lock_key(&row, &uploads))
                .or_default()
                .push(Queued { row, uploads, ready });
        }

        debug!(groups = groups.len(), "Processing deferred uploads");

        let mut summary = RunSummary::default();
        for group_summary in join_all(
            groups
                .into_iter()
                .map(|(key, rows)| self.process_group(key, rows)),
        )
        .await
        {
            summary.merge(group_summary);
        }

        if summary != RunSummary::default() {
            info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped_busy = summary.skipped_busy,
                blocked = summary.blocked,
                "Deferred upload run finished"
            );
        }
        Ok(summary)
    }

    async fn process_group(&self, key: String, mut rows: Vec<Queued>) -> RunSummary {
        let mut summary = RunSummary::default();

        let runnable = rows.iter().take_while(|queued| queued.ready).count();
        let held_back = rows.split_off(runnable);
        summary.blocked = held_back.iter().filter(|queued| queued.ready).count();
        if rows.is_empty() {
            return summary;
        }

        let locks = LockManager::new(&self.db);
        let holder = new_holder("worker");
        let expiry = chrono::Duration::seconds(self.config.file_group_lock_expiry_secs);

        match locks.acquire(&key, &holder, expiry).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(lock = %key, "File group busy, leaving rows for a later run");
                summary.skipped_busy = rows.len();
                return summary;
            }
            Err(e) => {
                error!(lock = %key, error = %e, "Failed to take file group lock");
                summary.skipped_busy = rows.len();
                return summary;
            }
        }

        let service = DeferredUploadService::new(&self.db);
        let mut rows = rows.into_iter();
        while let Some(Queued { row, uploads, .. }) = rows.next() {
            match self.process(&uploads).await {
                Ok(()) => match service.mark_completed(row.id).await {
                    Ok(_) => {
                        info!(deferred_upload_id = row.id, "Deferred upload completed");
                        summary.completed += 1;
                    }
                    Err(e) => {
                        error!(deferred_upload_id = row.id, error = %e, "Failed to mark deferred upload completed");
                        summary.blocked += rows.len();
                        break;
                    }
                },
                Err(failure) => {
                    let attempt = row.attempts + 1;
                    let retry_at = (failure.code.is_retryable()
                        && attempt < self.config.max_attempts)
                        .then(|| {
                            next_attempt_at(
                                Utc::now(),
                                attempt as u32,
                                self.config.backoff_base_ms,
                                self.config.backoff_max_ms,
                            )
                        });
                    warn!(
                        deferred_upload_id = row.id,
                        code = %failure.code,
                        attempt,
                        error = %failure.message,
                        held_back = rows.len(),
                        "Deferred upload failed"
                    );
                    if let Err(e) = service
                        .mark_error(row.id, failure.code, &failure.message, retry_at)
                        .await
                    {
                        error!(deferred_upload_id = row.id, error = %e, "Failed to record deferred upload error");
                    }
                    summary.failed += 1;
                    summary.blocked += rows.len();
                    break;
                }
            }
        }

        if let Err(e) = locks.release_if_held(&key, &holder).await {
            warn!(lock = %key, error = %e, "Failed to release file group lock");
        }
        summary
    }

    async fn process(&self, uploads: &[upload::Model]) -> Result<(), Failure> {
        for upload in uploads {
            let entry = FileIndexStore::new(&self.db)
                .find(FileIndexKey::File {
                    sharing_group_uuid: upload.sharing_group_uuid,
                    file_uuid: upload.file_uuid,
                })
                .await?
                .ok_or_else(|| {
                    Failure::new(
                        DeferredErrorCode::MissingIndex,
                        format!("File {} is not in the index", upload.file_uuid),
                    )
                })?;

            let owner = UserService::new(&self.db)
                .find_by_id(entry.owning_user_id)
                .await?
                .ok_or_else(|| {
                    Failure::new(
                        DeferredErrorCode::AccessRevoked,
                        format!("Owning user {} no longer exists", entry.owning_user_id),
                    )
                })?;
            let storage = self.accounts.cloud_storage(&owner).await?;
            let options = cloud_options(&owner, entry.mime_type.as_deref());

            match upload.state {
                UploadState::VNUploadFileChange => {
                    self.apply_change(storage.as_ref(), &options, &entry, upload)
                        .await?
                }
                UploadState::DeleteSingleFile => {
                    let name = cloud_file_name(
                        entry.file_uuid,
                        entry.device_uuid,
                        upload.file_version,
                        entry.mime_type.as_deref(),
                    );
                    delete_ignoring_missing(storage.as_ref(), &name, &options).await?;
                    debug!(cloud_name = %name, "Deleted cloud file");
                }
                other => {
                    warn!(upload_id = upload.id, state = %other, "Skipping upload with nothing to reconcile");
                }
            }
        }
        Ok(())
    }

    /// Merge one change record into the version it was based on and store
    /// the result as the next version.
    async fn apply_change(
        &self,
        storage: &dyn CloudStorage,
        options: &CloudFileOptions,
        entry: &file_index::Model,
        upload: &upload::Model,
    ) -> Result<(), Failure> {
        let resolver_name = entry.change_resolver_name.as_deref().ok_or_else(|| {
            Failure::new(
                DeferredErrorCode::MissingResolver,
                format!("File {} has no change resolver", entry.file_uuid),
            )
        })?;
        let resolver = self.resolvers.get(resolver_name).ok_or_else(|| {
            Failure::new(
                DeferredErrorCode::MissingResolver,
                format!("Change resolver '{resolver_name}' is not registered"),
            )
        })?;
        let change = upload.upload_contents.clone().ok_or_else(|| {
            Failure::new(
                DeferredErrorCode::MergeFailed,
                format!("Upload {} has no change contents", upload.id),
            )
        })?;

        let mime_type = entry.mime_type.as_deref();
        let base_version = upload.file_version;
        let target_version = base_version + 1;
        let base_name = cloud_file_name(entry.file_uuid, entry.device_uuid, base_version, mime_type);
        let target_name =
            cloud_file_name(entry.file_uuid, entry.device_uuid, target_version, mime_type);

        let checksum = match storage.download(&base_name, options).await {
            Ok(existing) => {
                let merged = resolver
                    .merge(&existing, &[change])
                    .map_err(|e| Failure::new(DeferredErrorCode::MergeFailed, e.to_string()))?;
                storage.upload(&target_name, &merged, options).await?
            }
            Err(CloudStorageError::NotFound(_)) => {
                // An earlier attempt stored the merge and removed the base.
                if !storage.lookup(&target_name, options).await? {
                    return Err(Failure::new(
                        DeferredErrorCode::CloudFailure,
                        format!("Neither {base_name} nor {target_name} exists"),
                    ));
                }
                let stored = storage.download(&target_name, options).await?;
                ContentHash::compute(&stored)
            }
            Err(e) => return Err(e.into()),
        };

        let recorded = FileIndexStore::new(&self.db)
            .update_fields(
                entry.id,
                Some(target_version),
                &[FileIndexUpdate::Checksum(Some(checksum.to_hex()))],
            )
            .await?;
        if !recorded {
            debug!(
                file = %entry.file_uuid,
                target_version,
                "Index moved past merged version, checksum not recorded"
            );
        }

        if let Err(e) = delete_ignoring_missing(storage, &base_name, options).await {
            warn!(cloud_name = %base_name, error = %e, "Failed to delete superseded version");
        }

        debug!(file = %entry.file_uuid, target_version, "Change merged");
        Ok(())
    }
}

async fn delete_ignoring_missing(
    storage: &dyn CloudStorage,
    name: &str,
    options: &CloudFileOptions,
) -> Result<(), CloudStorageError> {
    match storage.delete(name, options).await {
        Ok(()) | Err(CloudStorageError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

enum WorkerMessage {
    Notify,
    RunNow(oneshot::Sender<RunSummary>),
}

/// Handle used to wake the reconciliation worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    /// A handle with no worker behind it. Notifications are dropped.
    pub fn disabled() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Ask for a run soon. Never blocks; a wake-up already queued is enough.
    pub fn notify(&self) {
        if let Err(e) = self.tx.try_send(WorkerMessage::Notify) {
            debug!(error = %e, "Worker notification dropped");
        }
    }

    /// Run now and wait for the result. `None` when no worker is running.
    pub async fn run_now(&self) -> Option<RunSummary> {
        let (reply, done) = oneshot::channel();
        self.tx.send(WorkerMessage::RunNow(reply)).await.ok()?;
        done.await.ok()
    }
}

/// Spawn the worker loop: one run per notification and one per scan interval.
pub fn spawn_worker(worker: ReconciliationWorker) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(worker.run(rx));
    (WorkerHandle { tx }, task)
}

impl ReconciliationWorker {
    async fn run(self, mut rx: mpsc::Receiver<WorkerMessage>) {
        let scan_interval = Duration::from_secs(self.config.scan_interval_secs.max(1));
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            max_attempts = self.config.max_attempts,
            "Starting reconciliation worker"
        );

        let mut interval = tokio::time::interval(scan_interval);
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(WorkerMessage::Notify) => {
                        self.run_logged().await;
                    }
                    Some(WorkerMessage::RunNow(reply)) => {
                        let summary = self.run_logged().await;
                        let _ = reply.send(summary);
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    self.run_logged().await;
                }
            }
        }

        info!("Reconciliation worker stopped");
    }

    async fn run_logged(&self) -> RunSummary {
        match self.run_once().await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Deferred upload run failed");
                RunSummary::default()
            }
        }
    }
}
