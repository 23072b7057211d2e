//! Access to the authoritative per-group file index.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    UpdateMany,
};
use uuid::Uuid;

use crate::entity::file_index;

/// How to find one index row.
#[derive(Debug, Clone, Copy)]
pub enum FileIndexKey {
    Id(i32),
    File {
        sharing_group_uuid: Uuid,
        file_uuid: Uuid,
    },
}

/// One column change in a partial update of an index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIndexUpdate {
    FileVersion(i64),
    Deleted(bool),
    Checksum(Option<String>),
    AppMetaData(Option<String>),
    UpdateDate(DateTime<Utc>),
}

impl FileIndexUpdate {
    fn apply(&self, query: UpdateMany<file_index::Entity>) -> UpdateMany<file_index::Entity> {
        match self {
            Self::FileVersion(v) => query.col_expr(file_index::Column::FileVersion, Expr::value(*v)),
            Self::Deleted(d) => query.col_expr(file_index::Column::Deleted, Expr::value(*d)),
            Self::Checksum(c) => query.col_expr(file_index::Column::Checksum, Expr::value(c.clone())),
            Self::AppMetaData(m) => {
                query.col_expr(file_index::Column::AppMetaData, Expr::value(m.clone()))
            }
            Self::UpdateDate(d) => query.col_expr(file_index::Column::UpdateDate, Expr::value(*d)),
        }
    }
}

pub struct FileIndexStore<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> FileIndexStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find(&self, key: FileIndexKey) -> Result<Option<file_index::Model>, DbErr> {
        match key {
            FileIndexKey::Id(id) => file_index::Entity::find_by_id(id).one(self.conn).await,
            FileIndexKey::File {
                sharing_group_uuid,
                file_uuid,
            } => {
                file_index::Entity::find()
                    .filter(file_index::Column::SharingGroupUuid.eq(sharing_group_uuid))
                    .filter(file_index::Column::FileUuid.eq(file_uuid))
                    .one(self.conn)
                    .await
            }
        }
    }

    /// Every row of a group, tombstones included.
    pub async fn list(&self, sharing_group_uuid: Uuid) -> Result<Vec<file_index::Model>, DbErr> {
        file_index::Entity::find()
            .filter(file_index::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .order_by_asc(file_index::Column::CreationDate)
            .order_by_asc(file_index::Column::Id)
            .all(self.conn)
            .await
    }

    pub async fn insert(&self, row: file_index::ActiveModel) -> Result<file_index::Model, DbErr> {
        row.insert(self.conn).await
    }

    /// Apply `updates` to row `id`.
    ///
    /// With `expected_version`, the row is only touched while its
    /// `file_version` still has that value. Returns whether a row changed.
    pub async fn update_fields(
        &self,
        id: i32,
        expected_version: Option<i64>,
        updates: &[FileIndexUpdate],
    ) -> Result<bool, DbErr> {
        if updates.is_empty() {
            return Ok(false);
        }

        let mut query = file_index::Entity::update_many().filter(file_index::Column::Id.eq(id));
        if let Some(version) = expected_version {
            query = query.filter(file_index::Column::FileVersion.eq(version));
        }
        for update in updates {
            query = update.apply(query);
        }

        Ok(query.exec(self.conn).await?.rows_affected == 1)
    }
}
