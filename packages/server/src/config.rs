use common::config::{DeferredConfig, StorageConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub max_age: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Commit protocol and staging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Expiry of the per sharing group commit lock. Default: 60.
    #[serde(default = "default_commit_lock_expiry_secs")]
    pub commit_lock_expiry_secs: i64,
    /// Uncommitted staging rows older than this are removed. Default: 86400.
    #[serde(default = "default_staging_abandon_age_secs")]
    pub staging_abandon_age_secs: i64,
    /// Seconds between maintenance sweeps. Default: 300.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

fn default_commit_lock_expiry_secs() -> i64 {
    60
}
fn default_staging_abandon_age_secs() -> i64 {
    24 * 60 * 60
}
fn default_maintenance_interval_secs() -> u64 {
    300
}

impl SyncConfig {
    pub fn commit_lock_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.commit_lock_expiry_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            commit_lock_expiry_secs: default_commit_lock_expiry_secs(),
            staging_abandon_age_secs: default_staging_abandon_age_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InvitationConfig {
    /// Expiry used when the inviter does not choose one. Default: 86400.
    #[serde(default = "default_invitation_expiry_secs")]
    pub default_expiry_secs: i64,
    /// Upper bound on `number_acceptors`. Default: 10.
    #[serde(default = "default_max_acceptors")]
    pub max_acceptors: i32,
}

fn default_invitation_expiry_secs() -> i64 {
    24 * 60 * 60
}
fn default_max_acceptors() -> i32 {
    10
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            default_expiry_secs: default_invitation_expiry_secs(),
            max_acceptors: default_max_acceptors(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub invitation: InvitationConfig,
    #[serde(default)]
    pub deferred: DeferredConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.cors.allow_origins", Vec::<String>::new())?
            .set_default("server.cors.max_age", 3600)?
            .set_default("database.url", "sqlite://syncserver.db?mode=rwc")?
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., SYNCSERVER__AUTH__JWT_SECRET)
            .add_source(Environment::with_prefix("SYNCSERVER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
