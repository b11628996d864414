//! The cloud file area seam.

use crate::error::CloudError;
use async_trait::async_trait;

/// A shared blob store with eventual visibility, addressed by
/// `/`-separated relative paths.
#[async_trait]
pub trait CloudFileSystem: Send + Sync + 'static {
    /// Token identifying the signed-in cloud account, if the service has one.
    async fn identity_token(&self) -> Result<Option<String>, CloudError>;

    /// Paths of every file below `prefix`, recursively. An empty prefix
    /// lists the whole area.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, CloudError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, CloudError>;

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), CloudError>;

    /// Remove a file. Removing a missing file succeeds.
    async fn delete(&self, path: &str) -> Result<(), CloudError>;

    async fn exists(&self, path: &str) -> Result<bool, CloudError> {
        match self.get(path).await {
            Ok(_) => Ok(true),
            Err(CloudError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// True if `path` lies below `prefix`.
pub(crate) fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || path
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_under() {
        assert!(is_under("ens/devices/a.json", "ens/devices"));
        assert!(is_under("ens/devices/a.json", "ens/devices/"));
        assert!(is_under("ens/devices/a.json", ""));
        assert!(!is_under("ens/devices-old/a.json", "ens/devices"));
        assert!(!is_under("ens/devices", "ens/devices"));
    }
}
