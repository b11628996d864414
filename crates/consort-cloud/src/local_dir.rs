//! A cloud file area backed by a local directory, e.g. a folder another
//! program keeps in sync with a cloud drive.

use crate::error::CloudError;
use crate::fs::{is_under, CloudFileSystem};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

pub struct LocalDirCloudFileSystem {
    root: PathBuf,
    identity: Option<String>,
}

impl LocalDirCloudFileSystem {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, CloudError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            identity: None,
        })
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, CloudError> {
        let relative = Path::new(path);
        let valid = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !valid {
            return Err(CloudError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn to_cloud_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl CloudFileSystem for LocalDirCloudFileSystem {
    async fn identity_token(&self) -> Result<Option<String>, CloudError> {
        Ok(self.identity.clone())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CloudError> {
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    dirs.push(path);
                } else if path.extension().map_or(false, |ext| ext == "tmp") {
                    continue;
                } else if let Some(cloud_path) = self.to_cloud_path(&path) {
                    if is_under(&cloud_path, prefix) {
                        files.push(cloud_path);
                    }
                }
            }
        }

        files.sort();
        trace!(prefix, count = files.len(), "listed local cloud directory");
        Ok(files)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CloudError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), CloudError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = full.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &full).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CloudError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
