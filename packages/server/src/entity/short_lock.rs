use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A named, expiring mutex. The unique name makes a second insert for the
/// same name fail, which is what serialises acquirers.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "short_lock")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub name: String,

    pub holder: String,

    pub acquired_at: DateTimeUtc,

    /// `acquired_at` plus the expiry duration requested by the holder.
    #[sea_orm(indexed)]
    pub expires_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
