use std::sync::Arc;

use common::resolver::ResolverRegistry;
use sea_orm::DatabaseConnection;

use crate::account::AccountManager;
use crate::config::AppConfig;
use crate::deferred::WorkerHandle;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub accounts: Arc<dyn AccountManager>,
    pub resolvers: Arc<ResolverRegistry>,
    pub worker: WorkerHandle,
}
