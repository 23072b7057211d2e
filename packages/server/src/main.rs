use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common::resolver::ResolverRegistry;
use tracing::info;

use syncserver::account::StorageAccountManager;
use syncserver::config::AppConfig;
use syncserver::database::init_db;
use syncserver::deferred::{ReconciliationWorker, WorkerHandle, spawn_worker};
use syncserver::state::AppState;
use syncserver::sweeper::run_maintenance;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = Arc::new(AppConfig::load().context("Failed to load config")?);

    let db = init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    info!("Database connected");

    let accounts = Arc::new(StorageAccountManager::new(config.storage.clone()));
    let resolvers = Arc::new(ResolverRegistry::with_builtins());

    // TODO: Keep the join handles for graceful shutdown. The tasks run until process exit.
    let worker = if config.deferred.enabled {
        let (handle, _worker_task) = spawn_worker(ReconciliationWorker::new(
            db.clone(),
            accounts.clone(),
            resolvers.clone(),
            config.deferred.clone(),
        ));
        handle
    } else {
        info!("Reconciliation worker disabled");
        WorkerHandle::disabled()
    };
    let _maintenance_task = tokio::spawn(run_maintenance(
        db.clone(),
        accounts.clone(),
        config.sync.clone(),
    ));

    let state = AppState {
        db,
        config: config.clone(),
        accounts,
        resolvers,
        worker,
    };
    let app = syncserver::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
