//! Remote-state backend configuration.
//!
//! Plans keep their state in the cluster registry through the provisioner's
//! HTTP backend. The rendered block is written to `backend.tf` only when it
//! changed, so that `init` knows whether to reconfigure.

use serde::Serialize;
use std::fmt::Write;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::error::{ConvergeError, Result};

/// Name of the backend file inside a plan directory.
pub const BACKEND_FILE: &str = "backend.tf";

/// HTTP remote-state backend settings for one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpBackend {
    /// State endpoint.
    pub address: String,
    /// State update method.
    pub update_method: String,
    /// Lock endpoint.
    pub lock_address: String,
    /// Lock method.
    pub lock_method: String,
    /// Unlock endpoint.
    pub unlock_address: String,
    /// Unlock method.
    pub unlock_method: String,
    /// Skip TLS verification of the registry certificate.
    pub skip_cert_verification: bool,
}

impl HttpBackend {
    /// Backend for `plan` on the registry at `endpoint`.
    #[must_use]
    pub fn for_plan(endpoint: &str, plan: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        Self {
            address: format!("{endpoint}/terraformstate/{plan}"),
            update_method: String::from("PUT"),
            lock_address: format!("{endpoint}/terraformlock/{plan}"),
            lock_method: String::from("PUT"),
            unlock_address: format!("{endpoint}/terraformunlock/{plan}"),
            unlock_method: String::from("PUT"),
            skip_cert_verification: true,
        }
    }

    /// Renders the `terraform { backend "http" { ... } }` block.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be encoded.
    pub fn render(&self) -> Result<String> {
        let value = serde_json::to_value(self)
            .map_err(|e| ConvergeError::internal(format!("Failed to encode backend: {e}")))?;
        let Some(fields) = value.as_object() else {
            return Err(ConvergeError::internal("Backend did not encode as an object"));
        };

        let mut rendered = String::from("terraform {\n  backend \"http\" {\n");
        for (key, value) in fields {
            let _ = writeln!(rendered, "    {key} = {value}");
        }
        rendered.push_str("  }\n}\n");
        Ok(rendered)
    }
}

/// Writes `content` to `path` unless the file already holds it.
///
/// Returns whether the file was written.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub async fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if path.exists() {
        let existing = fs::read_to_string(path).await?;
        if existing == content {
            debug!("{} unchanged", path.display());
            return Ok(false);
        }
    }

    debug!("Writing {}", path.display());
    fs::write(path, content).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_endpoints() {
        let backend = HttpBackend::for_plan("https://10.0.0.1:7000/1.0/", "openstack-plan");
        assert_eq!(backend.address, "https://10.0.0.1:7000/1.0/terraformstate/openstack-plan");
        assert_eq!(backend.lock_address, "https://10.0.0.1:7000/1.0/terraformlock/openstack-plan");
        assert_eq!(
            backend.unlock_address,
            "https://10.0.0.1:7000/1.0/terraformunlock/openstack-plan"
        );
    }

    #[test]
    fn test_render() {
        let rendered = HttpBackend::for_plan("http://registry", "p")
            .render()
            .expect("render");

        assert!(rendered.starts_with("terraform {\n  backend \"http\" {\n"));
        assert!(rendered.contains("    address = \"http://registry/terraformstate/p\"\n"));
        assert!(rendered.contains("    lock_method = \"PUT\"\n"));
        assert!(rendered.contains("    update_method = \"PUT\"\n"));
        assert!(rendered.contains("    skip_cert_verification = true\n"));
        assert!(rendered.ends_with("  }\n}\n"));
    }

    #[tokio::test]
    async fn test_write_if_changed() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(BACKEND_FILE);

        assert!(write_if_changed(&path, "a").await.expect("write"));
        assert!(!write_if_changed(&path, "a").await.expect("write"));
        assert!(write_if_changed(&path, "b").await.expect("write"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "b");
    }
}
