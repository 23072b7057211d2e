use std::time::Duration;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

use crate::entity::{file_index, upload};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    // Set connection pool options
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;
    sync_schema(&db).await?;

    Ok(db)
}

/// Create or update every table, then the composite indexes.
pub async fn sync_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.get_schema_registry("syncserver::entity::*")
        .sync(db)
        .await?;
    ensure_indexes(db).await
}

/// Create composite indexes that schema sync cannot express.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();

    // One live row per file per sharing group.
    let stmt = Index::create()
        .if_not_exists()
        .unique()
        .name("idx_file_index_group_file")
        .table(file_index::Entity)
        .col(file_index::Column::SharingGroupUuid)
        .col(file_index::Column::FileUuid)
        .to_owned();
    db.execute_raw(backend.build(&stmt)).await?;
    info!("Ensured index idx_file_index_group_file exists");

    // Batch selection during commit:
    // SELECT * FROM upload WHERE device_uuid = ? AND sharing_group_uuid = ?
    let stmt = Index::create()
        .if_not_exists()
        .name("idx_upload_device_group")
        .table(upload::Entity)
        .col(upload::Column::DeviceUuid)
        .col(upload::Column::SharingGroupUuid)
        .to_owned();
    if let Err(e) = db.execute_raw(backend.build(&stmt)).await {
        tracing::warn!("Failed to create index idx_upload_device_group: {}", e);
    } else {
        info!("Ensured index idx_upload_device_group exists");
    }

    // A device stages each file and each batch position at most once until
    // the batch is committed.
    for (name, column) in [
        ("idx_upload_staged_file", "file_uuid"),
        ("idx_upload_staged_index", "upload_index"),
    ] {
        let stmt = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON upload \
             (device_uuid, sharing_group_uuid, {column}) WHERE deferred_upload_id IS NULL"
        );
        db.execute_unprepared(&stmt).await?;
        info!("Ensured index {name} exists");
    }

    Ok(())
}
