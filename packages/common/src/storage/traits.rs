use async_trait::async_trait;

use super::error::CloudStorageError;
use super::hash::ContentHash;

/// Per-call options passed to every storage operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudFileOptions {
    /// Folder in the owning user's drive, for schemes that use one.
    pub cloud_folder_name: Option<String>,
    pub mime_type: Option<String>,
}

impl CloudFileOptions {
    pub fn new(cloud_folder_name: Option<String>, mime_type: Option<String>) -> Self {
        Self {
            cloud_folder_name,
            mime_type,
        }
    }
}

/// Name-addressed file storage belonging to one owning account.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Store `data` under `name`, replacing any previous content, and return
    /// the checksum of what was stored.
    async fn upload(
        &self,
        name: &str,
        data: &[u8],
        options: &CloudFileOptions,
    ) -> Result<ContentHash, CloudStorageError>;

    /// Retrieve all bytes stored under `name`.
    async fn download(
        &self,
        name: &str,
        options: &CloudFileOptions,
    ) -> Result<Vec<u8>, CloudStorageError>;

    /// Delete the file stored under `name`.
    ///
    /// Fails with `NotFound` if nothing is stored there.
    async fn delete(&self, name: &str, options: &CloudFileOptions)
    -> Result<(), CloudStorageError>;

    /// Check whether a file is stored under `name`.
    async fn lookup(&self, name: &str, options: &CloudFileOptions)
    -> Result<bool, CloudStorageError>;
}
