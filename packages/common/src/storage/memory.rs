use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::CloudStorageError;
use super::hash::ContentHash;
use super::traits::{CloudFileOptions, CloudStorage};

/// Process-local cloud storage.
///
/// Access can be switched off with [`MemoryCloudStorage::set_revoked`] or
/// [`MemoryCloudStorage::set_unavailable`] to exercise the error paths of
/// callers.
#[derive(Default)]
pub struct MemoryCloudStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
    revoked: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryCloudStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `AccessTokenRevokedOrExpired`.
    pub fn set_revoked(&self, revoked: bool) {
        self.revoked.store(revoked, Ordering::SeqCst);
    }

    /// Make every call fail with `Transient`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Names of all stored files, as `folder/name` when a folder was given.
    pub async fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    fn check_access(&self) -> Result<(), CloudStorageError> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(CloudStorageError::AccessTokenRevokedOrExpired(
                "credentials revoked".into(),
            ));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CloudStorageError::Transient("storage unavailable".into()));
        }
        Ok(())
    }

    fn key(name: &str, options: &CloudFileOptions) -> String {
        match options.cloud_folder_name.as_deref() {
            Some(folder) => format!("{folder}/{name}"),
            None => name.to_string(),
        }
    }
}

#[async_trait]
impl CloudStorage for MemoryCloudStorage {
    async fn upload(
        &self,
        name: &str,
        data: &[u8],
        options: &CloudFileOptions,
    ) -> Result<ContentHash, CloudStorageError> {
        self.check_access()?;
        let checksum = ContentHash::compute(data);
        self.files
            .write()
            .await
            .insert(Self::key(name, options), data.to_vec());
        Ok(checksum)
    }

    async fn download(
        &self,
        name: &str,
        options: &CloudFileOptions,
    ) -> Result<Vec<u8>, CloudStorageError> {
        self.check_access()?;
        self.files
            .read()
            .await
            .get(&Self::key(name, options))
            .cloned()
            .ok_or_else(|| CloudStorageError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str, options: &CloudFileOptions) -> Result<(), CloudStorageError> {
        self.check_access()?;
        match self.files.write().await.remove(&Self::key(name, options)) {
            Some(_) => Ok(()),
            None => Err(CloudStorageError::NotFound(name.to_string())),
        }
    }

    async fn lookup(&self, name: &str, options: &CloudFileOptions) -> Result<bool, CloudStorageError> {
        self.check_access()?;
        Ok(self
            .files
            .read()
            .await
            .contains_key(&Self::key(name, options)))
    }
}
