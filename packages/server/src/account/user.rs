use chrono::Utc;
use common::{AccountScheme, UserType};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set, SqlErr};

use crate::entity::user;
use crate::error::SyncError;

/// Data needed to register an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub account_scheme: AccountScheme,
    pub creds_id: String,
    pub creds: serde_json::Value,
    pub cloud_folder_name: Option<String>,
}

/// Ways to look up a single user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(i32),
    Creds {
        account_scheme: AccountScheme,
        creds_id: String,
    },
}

pub struct UserService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> UserService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn add_user(&self, new_user: NewUser) -> Result<user::Model, SyncError> {
        if new_user.username.trim().is_empty() {
            return Err(SyncError::Validation("Username cannot be empty".into()));
        }
        if new_user.creds_id.is_empty() {
            return Err(SyncError::Validation("Credentials id cannot be empty".into()));
        }
        match new_user.account_scheme.user_type() {
            UserType::Owning => {
                if new_user.account_scheme.requires_cloud_folder()
                    && new_user.cloud_folder_name.is_none()
                {
                    return Err(SyncError::Validation(format!(
                        "{} accounts need a cloud folder name",
                        new_user.account_scheme
                    )));
                }
            }
            UserType::Sharing => {
                if new_user.cloud_folder_name.is_some() {
                    return Err(SyncError::Validation(
                        "Sharing accounts cannot have a cloud folder".into(),
                    ));
                }
            }
        }

        let model = user::ActiveModel {
            username: Set(new_user.username.trim().to_string()),
            account_scheme: Set(new_user.account_scheme),
            creds_id: Set(new_user.creds_id),
            creds: Set(new_user.creds),
            cloud_folder_name: Set(new_user.cloud_folder_name),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(user) => Ok(user),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Err(
                SyncError::Validation("An account with these credentials already exists".into()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn lookup(&self, key: UserLookup) -> Result<Option<user::Model>, DbErr> {
        match key {
            UserLookup::Id(id) => user::Entity::find_by_id(id).one(self.conn).await,
            UserLookup::Creds {
                account_scheme,
                creds_id,
            } => {
                user::Entity::find()
                    .filter(user::Column::AccountScheme.eq(account_scheme))
                    .filter(user::Column::CredsId.eq(creds_id))
                    .one(self.conn)
                    .await
            }
        }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<user::Model>, DbErr> {
        self.lookup(UserLookup::Id(id)).await
    }

    pub async fn find_by_creds(
        &self,
        account_scheme: AccountScheme,
        creds_id: &str,
    ) -> Result<Option<user::Model>, DbErr> {
        self.lookup(UserLookup::Creds {
            account_scheme,
            creds_id: creds_id.to_string(),
        })
        .await
    }
}
