use common::AccountScheme;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub username: String,

    pub account_scheme: AccountScheme,

    /// Identifier of the account at its sign-in provider.
    #[sea_orm(unique)]
    pub creds_id: String,

    /// Opaque provider credentials, interpreted by the account manager.
    #[sea_orm(column_type = "JsonBinary")]
    #[serde(skip_serializing)]
    pub creds: serde_json::Value,

    /// Folder holding this user's files in their cloud drive.
    pub cloud_folder_name: Option<String>,

    #[sea_orm(has_many)]
    pub memberships: HasMany<super::sharing_group_user::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
