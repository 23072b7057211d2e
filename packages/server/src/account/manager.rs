use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use common::AccountScheme;
use common::config::{StorageBackend, StorageConfig};
use common::storage::filesystem::FilesystemCloudStorage;
use common::storage::memory::MemoryCloudStorage;
use common::storage::{CloudFileOptions, CloudStorage, CloudStorageError};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::entity::user;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Accounts of scheme {0} have no cloud storage")]
    NoCloudStorage(AccountScheme),

    #[error("User {0} has no cloud folder configured")]
    MissingCloudFolder(i32),

    #[error("Credentials of user {0} are revoked or expired")]
    CredentialsRevoked(i32),

    #[error("Storage error: {0}")]
    Storage(#[from] CloudStorageError),
}

impl AccountError {
    pub fn is_reauthentication_required(&self) -> bool {
        match self {
            Self::CredentialsRevoked(_) => true,
            Self::Storage(e) => e.is_access_revoked(),
            _ => false,
        }
    }
}

/// Resolves a stored account into a live handle on its cloud storage.
#[async_trait]
pub trait AccountManager: Send + Sync {
    async fn cloud_storage(&self, user: &user::Model) -> Result<Arc<dyn CloudStorage>, AccountError>;
}

/// Options for storage calls made on behalf of `owner`.
pub fn cloud_options(owner: &user::Model, mime_type: Option<&str>) -> CloudFileOptions {
    CloudFileOptions::new(owner.cloud_folder_name.clone(), mime_type.map(str::to_string))
}

/// How the accounts of one scheme reach their files.
enum SchemeStorage {
    /// A personal drive, optionally with files kept in a named folder.
    Drive { folder_required: bool },
    /// No storage of its own; files live with an owning user.
    None,
}

fn scheme_storage(scheme: AccountScheme) -> SchemeStorage {
    match scheme {
        AccountScheme::Google | AccountScheme::Dropbox | AccountScheme::Microsoft => {
            SchemeStorage::Drive {
                folder_required: scheme.requires_cloud_folder(),
            }
        }
        AccountScheme::Facebook | AccountScheme::AppleSignIn => SchemeStorage::None,
    }
}

/// Account manager backed by the storage configured for the server.
///
/// Each owning account gets its own namespace: a directory
/// `{root}/{scheme}/{user id}` for the filesystem backend, or a separate
/// in-memory store.
pub struct StorageAccountManager {
    config: StorageConfig,
    memory: Mutex<HashMap<i32, Arc<MemoryCloudStorage>>>,
}

impl StorageAccountManager {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory store of an owning user, when the memory backend is in use.
    pub async fn memory_storage(&self, user_id: i32) -> Option<Arc<MemoryCloudStorage>> {
        if self.config.backend != StorageBackend::Memory {
            return None;
        }
        let mut stores = self.memory.lock().await;
        Some(stores.entry(user_id).or_default().clone())
    }

    fn user_root(&self, user: &user::Model) -> PathBuf {
        PathBuf::from(&self.config.root)
            .join(user.account_scheme.as_str().to_lowercase())
            .join(user.id.to_string())
    }

    fn check_credentials(user: &user::Model) -> Result<(), AccountError> {
        let revoked = user
            .creds
            .get("revoked")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if revoked {
            return Err(AccountError::CredentialsRevoked(user.id));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountManager for StorageAccountManager {
    async fn cloud_storage(&self, user: &user::Model) -> Result<Arc<dyn CloudStorage>, AccountError> {
        match scheme_storage(user.account_scheme) {
            SchemeStorage::None => Err(AccountError::NoCloudStorage(user.account_scheme)),
            SchemeStorage::Drive { folder_required } => {
                if folder_required && user.cloud_folder_name.is_none() {
                    return Err(AccountError::MissingCloudFolder(user.id));
                }
                Self::check_credentials(user)?;

                match self.config.backend {
                    StorageBackend::Filesystem => {
                        let storage =
                            FilesystemCloudStorage::new(self.user_root(user), self.config.max_file_size)
                                .await?;
                        Ok(Arc::new(storage))
                    }
                    StorageBackend::Memory => {
                        let mut stores = self.memory.lock().await;
                        let storage: Arc<dyn CloudStorage> =
                            stores.entry(user.id).or_default().clone();
                        Ok(storage)
                    }
                }
            }
        }
    }
}
