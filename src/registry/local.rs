//! Local file-based registry backend.
//!
//! Each key is stored as one JSON file in a directory, for single-machine
//! deployments and development.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ConvergeError, RegistryError, Result};

use super::store::Registry;

/// Default registry directory name.
const REGISTRY_DIR: &str = ".converge/registry";

/// File-backed registry.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    /// Directory holding one file per key.
    base_dir: PathBuf,
}

impl LocalRegistry {
    /// Creates a registry under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvergeError::internal(format!("Cannot determine current directory: {e}")))?
            .join(REGISTRY_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a registry rooted at a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Maps a key to its file, rejecting keys that would escape the directory.
    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(RegistryError::InvalidKey {
                key: key.to_string(),
            }
            .into());
        }
        Ok(self.base_dir.join(format!("{key}.json")))
    }

    /// Ensures the registry directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating registry directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                RegistryError::transport(format!("Failed to create registry directory: {e}"))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            debug!("Registry entry does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            RegistryError::transport(format!("Failed to read {}: {e}", path.display()))
        })?;

        let value = serde_json::from_str(&content).map_err(|e| RegistryError::Corrupted {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.entry_path(key)?;
        self.ensure_dir().await?;

        info!("Writing registry key {key} to {}", path.display());

        let content = serde_json::to_string_pretty(value)
            .map_err(|e| RegistryError::serialization(format!("Failed to encode '{key}': {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            RegistryError::transport(format!("Failed to create temp file: {e}"))
        })?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| RegistryError::transport(format!("Failed to write entry: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| RegistryError::transport(format!("Failed to sync entry: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| RegistryError::transport(format!("Failed to rename entry: {e}")))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            return Err(RegistryError::not_found(key).into());
        }

        info!("Deleting registry key {key}");
        fs::remove_file(&path)
            .await
            .map_err(|e| RegistryError::transport(format!("Failed to delete entry: {e}")))?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_registry() -> (LocalRegistry, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalRegistry::with_base_dir(temp_dir.path().join("registry"));
        (registry, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (registry, _temp) = create_test_registry();

        let value = json!({"mysql-channel": "8.0/stable"});
        registry.put("TerraformVarsOpenstack", &value).await.expect("put");

        let loaded = registry
            .get("TerraformVarsOpenstack")
            .await
            .expect("get")
            .expect("value should exist");
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (registry, _temp) = create_test_registry();
        assert!(registry.get("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (registry, _temp) = create_test_registry();

        registry.put("state", &json!({"state": "INIT"})).await.expect("put");
        registry.delete("state").await.expect("delete");
        assert!(registry.get("state").await.expect("get").is_none());

        let err = registry.delete("state").await.expect_err("second delete");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let (registry, _temp) = create_test_registry();

        for key in ["../escape", "a/b", "", ".hidden"] {
            let result = registry.put(key, &json!(1)).await;
            assert!(
                matches!(result, Err(ConvergeError::Registry(RegistryError::InvalidKey { .. }))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_corrupted_entry() {
        let (registry, _temp) = create_test_registry();
        std::fs::create_dir_all(registry.base_dir()).expect("mkdir");
        std::fs::write(registry.base_dir().join("bad.json"), "{not json").expect("write");

        let result = registry.get("bad").await;
        assert!(matches!(
            result,
            Err(ConvergeError::Registry(RegistryError::Corrupted { .. }))
        ));
    }
}
