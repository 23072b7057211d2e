use serde::Deserialize;

/// Which `CloudStorage` backend the account manager hands out.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files are written below `root`, one directory per scheme and folder.
    Filesystem,
    /// Process-local storage, lost on restart. Useful for development.
    Memory,
}

/// Cloud storage configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Default: filesystem.
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    /// Root directory of the filesystem backend. Default: "./data/cloud".
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Maximum size of a single stored file in bytes. Default: 64 MiB.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Filesystem
}
fn default_storage_root() -> String {
    "./data/cloud".into()
}
fn default_max_file_size() -> u64 {
    64 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Reconciliation worker configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct DeferredConfig {
    /// Whether the worker runs inside the server process. Default: true.
    #[serde(default = "default_deferred_enabled")]
    pub enabled: bool,
    /// Seconds between periodic scans for pending rows. Default: 30.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Failed rows are retried automatically up to this many attempts. Default: 5.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Base delay of the retry backoff in milliseconds. Default: 2000.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound of the retry backoff in milliseconds. Default: 300000.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Expiry of the per file group lock taken while merging. Default: 120.
    #[serde(default = "default_file_group_lock_expiry_secs")]
    pub file_group_lock_expiry_secs: i64,
}

fn default_deferred_enabled() -> bool {
    true
}
fn default_scan_interval_secs() -> u64 {
    30
}
fn default_max_attempts() -> i32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_backoff_max_ms() -> u64 {
    300_000
}
fn default_file_group_lock_expiry_secs() -> i64 {
    120
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            enabled: default_deferred_enabled(),
            scan_interval_secs: default_scan_interval_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            file_group_lock_expiry_secs: default_file_group_lock_expiry_secs(),
        }
    }
}
