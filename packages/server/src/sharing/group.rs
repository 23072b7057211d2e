use std::collections::HashMap;

use chrono::{Duration, Utc};
use common::{Permission, UserType};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionSession, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entity::{
    file_index, master_version, sharing_group, sharing_group_user, sharing_invitation, user,
};
use crate::error::SyncError;
use crate::lock::{LockManager, new_holder, sharing_group_lock_name};
use crate::master_version::MasterVersionStore;

/// A group as seen by one of its members.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub sharing_group_uuid: Uuid,
    pub name: Option<String>,
    pub permission: Permission,
    pub master_version: i64,
}

/// Result of a member leaving a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Files of the leaving owning user that were marked deleted.
    pub files_deleted: u64,
    /// The last member left, so the group itself was deleted.
    pub group_deleted: bool,
}

pub struct SharingService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> SharingService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn group(&self, sharing_group_uuid: Uuid) -> Result<Option<sharing_group::Model>, DbErr> {
        sharing_group::Entity::find_by_id(sharing_group_uuid)
            .one(self.conn)
            .await
    }

    /// The group, unless it does not exist or has been deleted.
    pub async fn active_group(&self, sharing_group_uuid: Uuid) -> Result<sharing_group::Model, SyncError> {
        match self.group(sharing_group_uuid).await? {
            Some(group) if !group.deleted => Ok(group),
            _ => Err(SyncError::NotFound(format!(
                "Sharing group {sharing_group_uuid} not found"
            ))),
        }
    }

    pub async fn membership(
        &self,
        sharing_group_uuid: Uuid,
        user_id: i32,
    ) -> Result<Option<sharing_group_user::Model>, DbErr> {
        sharing_group_user::Entity::find_by_id((sharing_group_uuid, user_id))
            .one(self.conn)
            .await
    }

    pub async fn members(&self, sharing_group_uuid: Uuid) -> Result<Vec<sharing_group_user::Model>, DbErr> {
        sharing_group_user::Entity::find()
            .filter(sharing_group_user::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .order_by_asc(sharing_group_user::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    /// Check that `user_id` is a member of an active group with at least `required`.
    pub async fn require_permission(
        &self,
        sharing_group_uuid: Uuid,
        user_id: i32,
        required: Permission,
    ) -> Result<sharing_group_user::Model, SyncError> {
        self.active_group(sharing_group_uuid).await?;

        let membership = self
            .membership(sharing_group_uuid, user_id)
            .await?
            .ok_or_else(|| {
                SyncError::PermissionDenied(format!(
                    "User {user_id} is not a member of sharing group {sharing_group_uuid}"
                ))
            })?;

        if !membership.permission.has_minimum(required) {
            return Err(SyncError::PermissionDenied(format!(
                "User {user_id} has {} permission, {required} required",
                membership.permission
            )));
        }

        Ok(membership)
    }

    /// Add a member. Fails if the user is already a member.
    pub async fn add_member(
        &self,
        sharing_group_uuid: Uuid,
        user_id: i32,
        permission: Permission,
        owning_user_id: Option<i32>,
    ) -> Result<sharing_group_user::Model, SyncError> {
        if self.membership(sharing_group_uuid, user_id).await?.is_some() {
            return Err(SyncError::Validation(format!(
                "User {user_id} is already a member of sharing group {sharing_group_uuid}"
            )));
        }

        let model = sharing_group_user::ActiveModel {
            sharing_group_uuid: Set(sharing_group_uuid),
            user_id: Set(user_id),
            permission: Set(permission),
            owning_user_id: Set(owning_user_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(membership) => Ok(membership),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(SyncError::Validation(format!(
                    "User {user_id} is already a member of sharing group {sharing_group_uuid}"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Active groups of a user, with the user's permission and each group's version.
    pub async fn groups_for_user(&self, user_id: i32) -> Result<Vec<GroupSummary>, DbErr> {
        let memberships = sharing_group_user::Entity::find()
            .filter(sharing_group_user::Column::UserId.eq(user_id))
            .all(self.conn)
            .await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }

        let uuids: Vec<Uuid> = memberships.iter().map(|m| m.sharing_group_uuid).collect();
        let permissions: HashMap<Uuid, Permission> = memberships
            .iter()
            .map(|m| (m.sharing_group_uuid, m.permission))
            .collect();

        let groups = sharing_group::Entity::find()
            .filter(sharing_group::Column::SharingGroupUuid.is_in(uuids.clone()))
            .filter(sharing_group::Column::Deleted.eq(false))
            .order_by_asc(sharing_group::Column::CreatedAt)
            .all(self.conn)
            .await?;

        let versions: HashMap<Uuid, i64> = master_version::Entity::find()
            .filter(master_version::Column::SharingGroupUuid.is_in(uuids))
            .all(self.conn)
            .await?
            .into_iter()
            .map(|row| (row.sharing_group_uuid, row.master_version))
            .collect();

        Ok(groups
            .into_iter()
            .filter_map(|group| {
                let permission = *permissions.get(&group.sharing_group_uuid)?;
                Some(GroupSummary {
                    sharing_group_uuid: group.sharing_group_uuid,
                    name: group.name,
                    permission,
                    master_version: versions
                        .get(&group.sharing_group_uuid)
                        .copied()
                        .unwrap_or(0),
                })
            })
            .collect())
    }

    pub async fn rename_group(
        &self,
        actor_id: i32,
        sharing_group_uuid: Uuid,
        name: Option<String>,
    ) -> Result<(), SyncError> {
        self.require_permission(sharing_group_uuid, actor_id, Permission::Admin)
            .await?;

        sharing_group::Entity::update_many()
            .col_expr(sharing_group::Column::Name, Expr::value(name))
            .filter(sharing_group::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    /// Tombstone the group's live files, or only those of `owning_user_id`.
    async fn tombstone_files(&self, sharing_group_uuid: Uuid, owning_user_id: Option<i32>) -> Result<u64, DbErr> {
        let mut query = file_index::Entity::update_many()
            .col_expr(file_index::Column::Deleted, Expr::value(true))
            .col_expr(
                file_index::Column::FileVersion,
                Expr::col(file_index::Column::FileVersion).add(1),
            )
            .col_expr(file_index::Column::UpdateDate, Expr::value(Utc::now()))
            .filter(file_index::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .filter(file_index::Column::Deleted.eq(false));
        if let Some(owning_user_id) = owning_user_id {
            query = query.filter(file_index::Column::OwningUserId.eq(owning_user_id));
        }
        Ok(query.exec(self.conn).await?.rows_affected)
    }

    /// Move the master version on; the caller holds the group lock.
    async fn advance_version(&self, sharing_group_uuid: Uuid) -> Result<(), SyncError> {
        let versions = MasterVersionStore::new(self.conn);
        let current = versions.current(sharing_group_uuid).await?.unwrap_or(0);
        if !versions.advance(sharing_group_uuid, current).await? {
            error!(sharing_group = %sharing_group_uuid, current, "Master version moved while holding the group lock");
            return Err(SyncError::InvariantViolation(format!(
                "Could not advance master version of {sharing_group_uuid} from {current}"
            )));
        }
        Ok(())
    }

    async fn mark_deleted(&self, sharing_group_uuid: Uuid) -> Result<(), DbErr> {
        sharing_group::Entity::update_many()
            .col_expr(sharing_group::Column::Deleted, Expr::value(true))
            .filter(sharing_group::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .exec(self.conn)
            .await?;
        Ok(())
    }
}

impl<'a, C: ConnectionTrait + TransactionTrait> SharingService<'a, C> {
    /// Create a group with `creator` as its admin and master version 0.
    ///
    /// Only owning users create groups; sharing users join by invitation.
    pub async fn create_group(
        &self,
        creator: &user::Model,
        sharing_group_uuid: Option<Uuid>,
        name: Option<String>,
    ) -> Result<sharing_group::Model, SyncError> {
        if creator.account_scheme.user_type() != UserType::Owning {
            return Err(SyncError::PermissionDenied(
                "Only owning users can create sharing groups".into(),
            ));
        }

        let sharing_group_uuid = sharing_group_uuid.unwrap_or_else(Uuid::new_v4);
        let txn = self.conn.begin().await?;
        let sharing = SharingService::new(&txn);

        if sharing.group(sharing_group_uuid).await?.is_some() {
            txn.rollback().await?;
            return Err(SyncError::Validation(format!(
                "Sharing group {sharing_group_uuid} already exists"
            )));
        }

        let group = sharing_group::ActiveModel {
            sharing_group_uuid: Set(sharing_group_uuid),
            name: Set(name),
            deleted: Set(false),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        MasterVersionStore::new(&txn)
            .initialize(sharing_group_uuid)
            .await?;
        sharing
            .add_member(sharing_group_uuid, creator.id, Permission::Admin, None)
            .await?;

        txn.commit().await?;

        info!(sharing_group = %sharing_group_uuid, user_id = creator.id, "Sharing group created");
        Ok(group)
    }

    /// Delete the group on behalf of an admin.
    ///
    /// Every live file becomes a tombstone, all memberships and invitations
    /// are removed and the master version advances, so devices resynchronise
    /// to an empty group. The group row stays, marked deleted, and every
    /// later operation on it is refused.
    pub async fn soft_delete_group(
        &self,
        actor_id: i32,
        sharing_group_uuid: Uuid,
        lock_expiry: Duration,
    ) -> Result<(), SyncError> {
        self.require_permission(sharing_group_uuid, actor_id, Permission::Admin)
            .await?;

        let lock_name = sharing_group_lock_name(sharing_group_uuid);
        let holder = new_holder(&format!("delete:{actor_id}"));
        let locks = LockManager::new(self.conn);
        if !locks.acquire(&lock_name, &holder, lock_expiry).await? {
            return Err(SyncError::Busy(format!(
                "Sharing group {sharing_group_uuid} is locked"
            )));
        }

        let result = self.soft_delete_locked(actor_id, sharing_group_uuid).await;

        if let Err(e) = locks.release_if_held(&lock_name, &holder).await {
            warn!(lock = %lock_name, error = %e, "Failed to release lock");
        }
        result
    }

    async fn soft_delete_locked(&self, actor_id: i32, sharing_group_uuid: Uuid) -> Result<(), SyncError> {
        let txn = self.conn.begin().await?;
        let sharing = SharingService::new(&txn);

        // The admin check is repeated under the lock.
        sharing
            .require_permission(sharing_group_uuid, actor_id, Permission::Admin)
            .await?;

        let files_deleted = sharing.tombstone_files(sharing_group_uuid, None).await?;
        let members_removed = sharing_group_user::Entity::delete_many()
            .filter(sharing_group_user::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .exec(&txn)
            .await?
            .rows_affected;
        let invitations_removed = sharing_invitation::Entity::delete_many()
            .filter(sharing_invitation::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .exec(&txn)
            .await?
            .rows_affected;
        sharing.advance_version(sharing_group_uuid).await?;
        sharing.mark_deleted(sharing_group_uuid).await?;

        txn.commit().await?;

        info!(
            sharing_group = %sharing_group_uuid,
            actor_id,
            files_deleted,
            members_removed,
            invitations_removed,
            "Sharing group deleted"
        );
        Ok(())
    }

    /// Remove `member` from the group.
    ///
    /// When an owning user leaves, their files in the group become
    /// tombstones and the sharing users attributed to them lose their owning
    /// user. Tombstoning files changes the index, so it runs under the commit
    /// lock and advances the master version. The group is deleted when its
    /// last member leaves.
    pub async fn leave_group(
        &self,
        member: &user::Model,
        sharing_group_uuid: Uuid,
        lock_expiry: Duration,
    ) -> Result<LeaveOutcome, SyncError> {
        let lock_name = sharing_group_lock_name(sharing_group_uuid);
        let holder = new_holder(&format!("leave:{}", member.id));
        let locks = LockManager::new(self.conn);
        if !locks.acquire(&lock_name, &holder, lock_expiry).await? {
            return Err(SyncError::Busy(format!(
                "Sharing group {sharing_group_uuid} is locked"
            )));
        }

        let result = self.leave_locked(member, sharing_group_uuid).await;

        if let Err(e) = locks.release_if_held(&lock_name, &holder).await {
            warn!(lock = %lock_name, error = %e, "Failed to release lock");
        }
        result
    }

    async fn leave_locked(&self, member: &user::Model, sharing_group_uuid: Uuid) -> Result<LeaveOutcome, SyncError> {
        let txn = self.conn.begin().await?;
        let sharing = SharingService::new(&txn);

        sharing.active_group(sharing_group_uuid).await?;
        if sharing.membership(sharing_group_uuid, member.id).await?.is_none() {
            txn.rollback().await?;
            return Err(SyncError::NotFound(format!(
                "User {} is not a member of sharing group {sharing_group_uuid}",
                member.id
            )));
        }

        let member_count = sharing_group_user::Entity::find()
            .filter(sharing_group_user::Column::SharingGroupUuid.eq(sharing_group_uuid))
            .count(&txn)
            .await?;

        let mut files_deleted = 0;
        if member.account_scheme.user_type() == UserType::Owning {
            sharing_group_user::Entity::update_many()
                .col_expr(
                    sharing_group_user::Column::OwningUserId,
                    Expr::value(Option::<i32>::None),
                )
                .filter(sharing_group_user::Column::SharingGroupUuid.eq(sharing_group_uuid))
                .filter(sharing_group_user::Column::OwningUserId.eq(member.id))
                .exec(&txn)
                .await?;

            files_deleted = sharing
                .tombstone_files(sharing_group_uuid, Some(member.id))
                .await?;
        }

        sharing_group_user::Entity::delete_by_id((sharing_group_uuid, member.id))
            .exec(&txn)
            .await?;

        if files_deleted > 0 {
            sharing.advance_version(sharing_group_uuid).await?;
        }

        let group_deleted = member_count <= 1;
        if group_deleted {
            sharing.mark_deleted(sharing_group_uuid).await?;
        }

        txn.commit().await?;

        info!(
            sharing_group = %sharing_group_uuid,
            user_id = member.id,
            files_deleted,
            group_deleted,
            "User left sharing group"
        );
        Ok(LeaveOutcome {
            files_deleted,
            group_deleted,
        })
    }
}
