//! Periodic maintenance: stale locks, expired invitations and abandoned
//! staging rows.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::account::AccountManager;
use crate::config::SyncConfig;
use crate::entity::upload;
use crate::error::{ExternalError, SyncError};
use crate::lock::{LockManager, new_holder, sharing_group_lock_name};
use crate::sharing::InvitationService;
use crate::upload::{StagingStore, discard_staged_content};

/// Rows and cloud objects removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub locks: u64,
    pub invitations: u64,
    pub uploads: u64,
    /// Stored first-version contents of swept uploads.
    pub contents: u64,
}

/// Run the maintenance sweeper as a background task.
pub async fn run_maintenance(db: DatabaseConnection, accounts: Arc<dyn AccountManager>, config: SyncConfig) {
    let interval_secs = config.maintenance_interval_secs.max(1);
    info!(
        interval_secs,
        staging_abandon_age_secs = config.staging_abandon_age_secs,
        "Starting maintenance sweeper"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep_once(&db, accounts.as_ref(), &config).await {
            Ok(summary) if summary != SweepSummary::default() => {
                info!(
                    locks = summary.locks,
                    invitations = summary.invitations,
                    uploads = summary.uploads,
                    contents = summary.contents,
                    "Maintenance sweep removed stale rows"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Maintenance sweep failed"),
        }
    }
}

/// One sweep.
///
/// Staging rows older than the abandon age are dropped, which is the same
/// age based policy as stale lock reclamation. Each sharing group's rows are
/// swept under its commit lock; a group being committed to waits for the
/// next sweep.
pub async fn sweep_once<C: ConnectionTrait>(
    db: &C,
    accounts: &dyn AccountManager,
    config: &SyncConfig,
) -> anyhow::Result<SweepSummary> {
    let locks = LockManager::new(db).reclaim_stale(None).await?;
    let invitations = InvitationService::new(db).sweep_expired().await?;

    let cutoff = Utc::now() - chrono::Duration::seconds(config.staging_abandon_age_secs);
    let mut by_group: BTreeMap<Uuid, Vec<upload::Model>> = BTreeMap::new();
    for row in StagingStore::new(db).abandoned_before(cutoff).await? {
        by_group.entry(row.sharing_group_uuid).or_default().push(row);
    }

    let mut summary = SweepSummary {
        locks,
        invitations,
        ..Default::default()
    };
    for (sharing_group_uuid, rows) in by_group {
        let lock_name = sharing_group_lock_name(sharing_group_uuid);
        let holder = new_holder("sweeper");
        let lock_manager = LockManager::new(db);
        if !lock_manager
            .acquire(&lock_name, &holder, config.commit_lock_expiry())
            .await?
        {
            debug!(sharing_group = %sharing_group_uuid, "Group busy, sweeping later");
            continue;
        }

        let swept = sweep_group(db, accounts, rows).await;

        if let Err(e) = lock_manager.release_if_held(&lock_name, &holder).await {
            warn!(lock = %lock_name, error = %e, "Failed to release commit lock");
        }
        let (uploads, contents) = swept?;
        summary.uploads += uploads;
        summary.contents += contents;
    }

    Ok(summary)
}

/// Drop abandoned rows of one group together with their stored content.
///
/// A row whose content could not be removed for a reason that may clear up
/// is kept for the next sweep.
async fn sweep_group<C: ConnectionTrait>(
    db: &C,
    accounts: &dyn AccountManager,
    rows: Vec<upload::Model>,
) -> Result<(u64, u64), SyncError> {
    let mut removable = Vec::with_capacity(rows.len());
    let mut contents = 0;

    for row in rows {
        match discard_staged_content(db, accounts, &row).await {
            Ok(true) => contents += 1,
            Ok(false) => {}
            Err(e) if is_transient(&e) => {
                warn!(upload_id = row.id, error = %e, "Keeping abandoned upload until its content is removed");
                continue;
            }
            Err(e) => {
                warn!(upload_id = row.id, error = %e, "Dropping abandoned upload with unreachable content");
            }
        }
        removable.push(row.id);
    }

    let uploads = StagingStore::new(db).delete(removable).await?;
    Ok((uploads, contents))
}

fn is_transient(err: &SyncError) -> bool {
    match err {
        SyncError::Database(_) => true,
        SyncError::External(ExternalError::Storage(e)) => !e.is_access_revoked(),
        _ => false,
    }
}
