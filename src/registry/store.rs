//! Registry trait definition and typed access helpers.
//!
//! The registry holds small JSON documents keyed by string. A missing key is
//! reported as `None` by `get`, never as an empty value.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConvergeError, RegistryError, Result};

/// Trait for cluster registry backends.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Deletes `key`.
    ///
    /// Fails with [`RegistryError::NotFound`] if the key does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Base address the provisioner's HTTP state backend should use, if the
    /// registry exposes one.
    fn state_endpoint(&self) -> Option<String> {
        None
    }
}

/// Reads and decodes a typed value.
///
/// # Errors
///
/// Returns an error on transport failure or if the stored value does not
/// decode as `T`.
pub async fn read_config<T: DeserializeOwned>(registry: &dyn Registry, key: &str) -> Result<Option<T>> {
    let Some(value) = registry.get(key).await? else {
        debug!("Registry key {key} not present");
        return Ok(None);
    };

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| {
            ConvergeError::Registry(RegistryError::Corrupted {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
}

/// Encodes and stores a typed value.
///
/// # Errors
///
/// Returns an error on transport failure or if `value` cannot be encoded.
pub async fn update_config<T: Serialize + Sync + ?Sized>(
    registry: &dyn Registry,
    key: &str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value)
        .map_err(|e| RegistryError::serialization(format!("Failed to encode '{key}': {e}")))?;
    registry.put(key, &value).await
}

/// Deletes a key, tolerating its absence.
///
/// Returns whether the key existed.
///
/// # Errors
///
/// Returns an error on any failure other than a missing key.
pub async fn delete_config_if_present(registry: &dyn Registry, key: &str) -> Result<bool> {
    match registry.delete(key).await {
        Ok(()) => Ok(true),
        Err(ConvergeError::Registry(RegistryError::NotFound { .. })) => {
            warn!("Registry key {key} already absent");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        scale: u32,
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_absence() {
        let registry = MemoryRegistry::new();

        let missing: Option<Sample> = read_config(&registry, "sample").await.expect("read");
        assert!(missing.is_none());

        let sample = Sample { name: String::from("mysql"), scale: 3 };
        update_config(&registry, "sample", &sample).await.expect("write");

        let loaded: Option<Sample> = read_config(&registry, "sample").await.expect("read");
        assert_eq!(loaded, Some(sample));
    }

    #[tokio::test]
    async fn test_corrupted_value_is_reported() {
        let registry = MemoryRegistry::new();
        registry
            .put("sample", &serde_json::json!("not an object"))
            .await
            .expect("write");

        let result: Result<Option<Sample>> = read_config(&registry, "sample").await;
        assert!(matches!(
            result,
            Err(ConvergeError::Registry(RegistryError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_if_present_tolerates_missing_key() {
        let registry = MemoryRegistry::new();
        assert!(!delete_config_if_present(&registry, "gone").await.expect("delete"));

        registry.put("here", &Value::Null).await.expect("write");
        assert!(delete_config_if_present(&registry, "here").await.expect("delete"));
    }
}
