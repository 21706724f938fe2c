//! HTTP registry backend.
//!
//! Talks to the cluster daemon's REST API. Values travel as JSON text wrapped
//! in a `metadata` envelope; a 404 means the key does not exist.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::error::{ConvergeError, RegistryError, Result};

use super::lock::ProvisionerLock;
use super::store::Registry;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    metadata: Value,
}

/// Registry reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    /// HTTP client.
    client: Client,
    /// API base address, including the version prefix.
    address: String,
    /// Parsed form of `address`.
    base: Url,
}

impl HttpRegistry {
    /// Creates a client for the registry at `address` (e.g.
    /// `https://10.0.0.1:7000/1.0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not a valid base URL or the HTTP
    /// client cannot be created.
    pub fn new(address: &str, skip_cert_verification: bool) -> Result<Self> {
        let address = address.trim_end_matches('/').to_string();
        let base = Url::parse(&address)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| RegistryError::transport(format!("Invalid registry address: {address}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(skip_cert_verification)
            .build()
            .map_err(|e| RegistryError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, address, base })
    }

    /// API base address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Builds `{address}/{collection}/{name}`, percent-encoding `name` as a
    /// single path segment.
    fn url(&self, collection: &str, name: &str) -> Result<Url> {
        if name.is_empty() {
            return Err(RegistryError::InvalidKey { key: name.to_string() }.into());
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RegistryError::transport(format!("Invalid registry address: {}", self.address)))?
            .pop_if_empty()
            .extend([collection, name]);
        Ok(url)
    }

    /// Issues a GET and returns the decoded `metadata`, or `None` on 404.
    async fn fetch(&self, url: Url) -> Result<Option<Value>> {
        trace!("GET {url}");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RegistryError::transport(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::transport(format!("GET {url} returned {status}: {body}")).into());
        }

        let envelope: Envelope = response.json().await.map_err(|e| {
            RegistryError::transport(format!("GET {url} returned an invalid body: {e}"))
        })?;

        Ok(Some(envelope.metadata))
    }

    /// Issues a PUT with a raw text body.
    async fn send_put(&self, url: Url, body: String) -> Result<()> {
        trace!("PUT {url}");

        let response = self
            .client
            .put(url.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| RegistryError::transport(format!("PUT {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::transport(format!("PUT {url} returned {status}: {body}")).into());
        }
        Ok(())
    }

    /// Reads the provisioner lock currently held on `plan`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or if the lock cannot be decoded.
    pub async fn provisioner_lock(&self, plan: &str) -> Result<Option<ProvisionerLock>> {
        let Some(metadata) = self.fetch(self.url("terraformlock", plan)?).await? else {
            return Ok(None);
        };

        let value = decode_metadata(&format!("terraformlock/{plan}"), metadata)?;
        if value.is_null() || value.as_object().is_some_and(serde_json::Map::is_empty) {
            return Ok(None);
        }

        serde_json::from_value(value).map(Some).map_err(|e| {
            ConvergeError::Registry(RegistryError::Corrupted {
                key: format!("terraformlock/{plan}"),
                message: e.to_string(),
            })
        })
    }

    /// Releases the provisioner lock on `plan`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn unlock_provisioner_plan(&self, plan: &str, lock: &ProvisionerLock) -> Result<()> {
        let body = serde_json::to_string(lock)
            .map_err(|e| RegistryError::serialization(format!("Failed to encode lock: {e}")))?;
        info!("Releasing provisioner lock {} on plan {plan}", lock.id);
        self.send_put(self.url("terraformunlock", plan)?, body).await
    }
}

/// Values are stored as JSON text; older entries may hold plain JSON.
fn decode_metadata(key: &str, metadata: Value) -> Result<Value> {
    match metadata {
        Value::String(text) if text.is_empty() => Ok(Value::Null),
        Value::String(text) => serde_json::from_str(&text).map_err(|e| {
            ConvergeError::Registry(RegistryError::Corrupted {
                key: key.to_string(),
                message: e.to_string(),
            })
        }),
        other => Ok(other),
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.fetch(self.url("config", key)?).await? {
            Some(metadata) => decode_metadata(key, metadata).map(Some),
            None => {
                debug!("Registry key {key} not found");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_string(value)
            .map_err(|e| RegistryError::serialization(format!("Failed to encode '{key}': {e}")))?;
        debug!("Updating registry key {key}");
        self.send_put(self.url("config", key)?, body).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.url("config", key)?;
        trace!("DELETE {url}");

        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| RegistryError::transport(format!("DELETE {url} failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::not_found(key).into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::transport(format!("DELETE {url} returned {status}: {body}")).into());
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }

    fn state_endpoint(&self) -> Option<String> {
        Some(self.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry_for(server: &MockServer) -> HttpRegistry {
        HttpRegistry::new(&format!("{}/1.0", server.uri()), false).expect("client")
    }

    #[tokio::test]
    async fn test_get_decodes_metadata_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.0/config/TerraformVarsOpenstack"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "sync",
                "status": "Success",
                "metadata": "{\"mysql-channel\": \"8.0/stable\"}"
            })))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let value = registry.get("TerraformVarsOpenstack").await.expect("get");
        assert_eq!(value, Some(json!({"mysql-channel": "8.0/stable"})));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.0/config/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "ConfigItem not found"})))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        assert_eq!(registry.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_keys_are_encoded_as_one_segment() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/1.0/config/plans%2Fopenstack%3Fv=1%20x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        registry
            .put("plans/openstack?v=1 x", &json!({"a": 1}))
            .await
            .expect("put");

        let err = registry.get("").await.expect_err("empty key");
        assert!(matches!(err, ConvergeError::Registry(RegistryError::InvalidKey { .. })));
    }

    #[test]
    fn test_rejects_invalid_address() {
        assert!(HttpRegistry::new("not a url", false).is_err());
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let err = registry.get("anything").await.expect_err("should fail");
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_put_sends_json_text() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/1.0/config/state"))
            .and(body_string(r#"{"state":"SCALED_UP"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        registry.put("state", &json!({"state": "SCALED_UP"})).await.expect("put");
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/1.0/config/state"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let err = registry.delete("state").await.expect_err("should fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_provisioner_lock_and_unlock() {
        let server = MockServer::start().await;
        let lock = json!({
            "ID": "abc",
            "Operation": "OperationTypeApply",
            "Info": "",
            "Who": "ubuntu@node-1",
            "Version": "1.5.7",
            "Created": "2024-05-01T10:00:00Z",
            "Path": ""
        });
        Mock::given(method("GET"))
            .and(path("/1.0/terraformlock/openstack-plan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": lock.to_string()})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/terraformunlock/openstack-plan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let held = registry
            .provisioner_lock("openstack-plan")
            .await
            .expect("lock")
            .expect("lock should be held");
        assert_eq!(held.id, "abc");

        registry
            .unlock_provisioner_plan("openstack-plan", &held)
            .await
            .expect("unlock");
    }

    #[test]
    fn test_state_endpoint_is_api_base() {
        let registry = HttpRegistry::new("https://10.0.0.1:7000/1.0/", true).expect("client");
        assert_eq!(registry.state_endpoint().as_deref(), Some("https://10.0.0.1:7000/1.0"));
    }
}
