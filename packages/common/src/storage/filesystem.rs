use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::error::CloudStorageError;
use super::hash::ContentHash;
use super::traits::{CloudFileOptions, CloudStorage};

/// Filesystem-backed cloud storage for one owning account.
///
/// Files live at `{base_path}/{cloud folder}/{name}`, or directly under
/// `base_path` when the account has no cloud folder. Writes go through a
/// temporary file and a rename so readers never observe partial content.
pub struct FilesystemCloudStorage {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemCloudStorage {
    /// Create a new filesystem storage rooted at `base_path`.
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, CloudStorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Compute the filesystem path for a file name.
    fn file_path(&self, name: &str, options: &CloudFileOptions) -> Result<PathBuf, CloudStorageError> {
        validate_component(name)?;
        match options.cloud_folder_name.as_deref() {
            Some(folder) => {
                validate_component(folder)?;
                Ok(self.base_path.join(folder).join(name))
            }
            None => Ok(self.base_path.join(name)),
        }
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

fn validate_component(component: &str) -> Result<(), CloudStorageError> {
    if component.is_empty()
        || component.starts_with('.')
        || component.contains(['/', '\\'])
    {
        return Err(CloudStorageError::InvalidName(component.to_string()));
    }
    Ok(())
}

#[async_trait]
impl CloudStorage for FilesystemCloudStorage {
    async fn upload(
        &self,
        name: &str,
        data: &[u8],
        options: &CloudFileOptions,
    ) -> Result<ContentHash, CloudStorageError> {
        if data.len() as u64 > self.max_size {
            return Err(CloudStorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let path = self.file_path(name, options)?;
        let checksum = ContentHash::compute(data);

        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(checksum)
    }

    async fn download(
        &self,
        name: &str,
        options: &CloudFileOptions,
    ) -> Result<Vec<u8>, CloudStorageError> {
        let path = self.file_path(name, options)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudStorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str, options: &CloudFileOptions) -> Result<(), CloudStorageError> {
        let path = self.file_path(name, options)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudStorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, name: &str, options: &CloudFileOptions) -> Result<bool, CloudStorageError> {
        let path = self.file_path(name, options)?;
        Ok(fs::try_exists(&path).await?)
    }
}
