use sea_orm::sea_query::{Expr, ExprTrait, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, DbErr, EntityTrait, QueryFilter,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::master_version;

/// Per sharing group version counter.
///
/// `advance` is a compare-and-swap: the only way the counter moves.
pub struct MasterVersionStore<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> MasterVersionStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Create the counter of a new sharing group at 0.
    pub async fn initialize(&self, sharing_group_uuid: Uuid) -> Result<(), DbErr> {
        master_version::ActiveModel {
            sharing_group_uuid: Set(sharing_group_uuid),
            master_version: Set(0),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Ok(())
    }

    pub async fn current(&self, sharing_group_uuid: Uuid) -> Result<Option<i64>, DbErr> {
        Ok(master_version::Entity::find_by_id(sharing_group_uuid)
            .one(self.conn)
            .await?
            .map(|row| row.master_version))
    }

    /// Like `current`, but row-locks the counter until the transaction ends
    /// on backends with row locking.
    pub async fn current_for_update(&self, sharing_group_uuid: Uuid) -> Result<Option<i64>, DbErr> {
        let mut query = master_version::Entity::find_by_id(sharing_group_uuid);
        if self.conn.get_database_backend() == DbBackend::Postgres {
            query = query.lock(LockType::Update);
        }
        Ok(query.one(self.conn).await?.map(|row| row.master_version))
    }

    /// Increment the counter iff it still equals `expected_current`.
    pub async fn advance(&self, sharing_group_uuid: Uuid, expected_current: i64) -> Result<bool, DbErr> {
        let result = master_version::Entity::update_many()
            .col_expr(
                master_version::Column::MasterVersion,
                Expr::col(master_version::Column::MasterVersion).add(1),
            )
            .filter(master_version::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .filter(master_version::Column::MasterVersion.eq(expected_current))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
