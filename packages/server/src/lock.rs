//! Named, expiring mutexes stored in the `short_lock` table.
//!
//! A lock is a row keyed by a unique name. Acquiring inserts the row, so two
//! acquirers racing for the same name are serialised by the unique index. A
//! row whose `expires_at` has passed is stale: its holder is presumed dead
//! and the next acquirer removes it first.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set, SqlErr,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::short_lock;

/// Lock serialising commits to one sharing group.
pub fn sharing_group_lock_name(sharing_group_uuid: Uuid) -> String {
    format!("sharing-group:{sharing_group_uuid}")
}

/// Lock serialising content uploads of one device to one sharing group.
pub fn staging_lock_name(sharing_group_uuid: Uuid, device_uuid: Uuid) -> String {
    format!("staging:{sharing_group_uuid}:{device_uuid}")
}

/// Lock serialising reconciliation of one file group.
pub fn file_group_lock_name(file_group_uuid: Uuid) -> String {
    format!("file-group:{file_group_uuid}")
}

/// Lock serialising reconciliation of a single file without a file group.
pub fn file_lock_name(file_uuid: Uuid) -> String {
    format!("file:{file_uuid}")
}

/// Unique holder token. Holders only release locks carrying their own token.
pub fn new_holder(prefix: &str) -> String {
    format!("{prefix}:{}", Uuid::new_v4())
}

pub struct LockManager<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> LockManager<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Try to take the lock `name` for `expiry`.
    ///
    /// Returns `false` when a non-stale holder exists. Never waits.
    pub async fn acquire(&self, name: &str, holder: &str, expiry: Duration) -> Result<bool, DbErr> {
        let reclaimed = self.reclaim_stale(Some(name)).await?;
        if reclaimed > 0 {
            info!(lock = name, "Reclaimed stale lock");
        }

        let now = Utc::now();
        let model = short_lock::ActiveModel {
            name: Set(name.to_string()),
            holder: Set(holder.to_string()),
            acquired_at: Set(now),
            expires_at: Set(now + expiry),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(_) => {
                debug!(lock = name, holder, "Lock acquired");
                Ok(true)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(lock = name, holder, "Lock busy");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Release `name` regardless of who holds it.
    pub async fn release(&self, name: &str) -> Result<bool, DbErr> {
        let result = short_lock::Entity::delete_many()
            .filter(short_lock::Column::Name.eq(name))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Release `name` only if `holder` still holds it.
    ///
    /// Returns `false` when the lock went stale and was taken over meanwhile.
    pub async fn release_if_held(&self, name: &str, holder: &str) -> Result<bool, DbErr> {
        let result = short_lock::Entity::delete_many()
            .filter(short_lock::Column::Name.eq(name))
            .filter(short_lock::Column::Holder.eq(holder))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Delete stale locks, either for one name or for every name.
    pub async fn reclaim_stale(&self, name: Option<&str>) -> Result<u64, DbErr> {
        let mut query =
            short_lock::Entity::delete_many().filter(short_lock::Column::ExpiresAt.lt(Utc::now()));
        if let Some(name) = name {
            query = query.filter(short_lock::Column::Name.eq(name));
        }
        Ok(query.exec(self.conn).await?.rows_affected)
    }

    /// Current holder row of `name`, stale or not.
    pub async fn get(&self, name: &str) -> Result<Option<short_lock::Model>, DbErr> {
        short_lock::Entity::find()
            .filter(short_lock::Column::Name.eq(name))
            .one(self.conn)
            .await
    }
}
