//! Handles shared by every command of a deployment.
//!
//! A [`Deployment`] bundles the parsed configuration, the manifest, the
//! registry and the two control-plane clients, and hands out per-plan
//! provisioner adapters.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{
    ConfigParser, EngineConfig, Manifest, PlanConfig, RegistryBackend, RegistryConfig,
};
use crate::error::{ConfigError, ConvergeError, Result};
use crate::orchestrator::{Orchestrator, OrchestratorCli, WaitPolicy};
use crate::provisioner::{LockRetryPolicy, Provisioner};
use crate::registry::{HttpRegistry, LocalRegistry, MemoryRegistry, Registry};
use crate::runner::{CommandRunner, TokioCommandRunner};

/// Everything a plan needs to talk to the outside world.
#[derive(Clone)]
pub struct Deployment {
    config: EngineConfig,
    manifest: Arc<Manifest>,
    registry: Arc<dyn Registry>,
    http_registry: Option<HttpRegistry>,
    runner: Arc<dyn CommandRunner>,
    orchestrator: Arc<dyn Orchestrator>,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("registry", &self.registry.backend_type())
            .field("plans", &self.config.plans.len())
            .finish_non_exhaustive()
    }
}

impl Deployment {
    /// Assembles a deployment from explicit parts.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        manifest: Manifest,
        registry: Arc<dyn Registry>,
        runner: Arc<dyn CommandRunner>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Self {
            config,
            manifest: Arc::new(manifest),
            registry,
            http_registry: None,
            runner,
            orchestrator,
        }
    }

    /// Builds the deployment described by `config`, spawning real processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be loaded or the registry
    /// cannot be set up.
    pub fn from_config(config: EngineConfig, parser: &ConfigParser) -> Result<Self> {
        let manifest = parser.load_manifest(&config)?;
        let (registry, http_registry) = build_registry(&config.registry, parser)?;
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new());
        let orchestrator = Arc::new(OrchestratorCli::from_config(&config.orchestrator, runner.clone()));

        info!(
            "Using {} registry, orchestrator model {}",
            registry.backend_type(),
            config.orchestrator.model
        );

        Ok(Self {
            http_registry,
            ..Self::new(config, manifest, registry, runner, orchestrator)
        })
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deployment manifest.
    #[must_use]
    pub fn manifest(&self) -> Arc<Manifest> {
        self.manifest.clone()
    }

    /// Cluster registry.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    /// HTTP registry, when the deployment uses one.
    #[must_use]
    pub const fn http_registry(&self) -> Option<&HttpRegistry> {
        self.http_registry.as_ref()
    }

    /// Application orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> Arc<dyn Orchestrator> {
        self.orchestrator.clone()
    }

    /// Finds a declared plan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlan`] if no plan has this name.
    pub fn plan(&self, name: &str) -> Result<&PlanConfig> {
        self.config.plan(name).ok_or_else(|| {
            ConvergeError::Config(ConfigError::UnknownPlan {
                name: name.to_string(),
            })
        })
    }

    /// Provisioner adapter of a declared plan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlan`] if no plan has this name.
    pub fn provisioner(&self, name: &str) -> Result<Provisioner> {
        let plan = self.plan(name)?;
        let endpoint = self.registry.state_endpoint();
        debug!(
            "Provisioner for {name} uses {} state",
            if endpoint.is_some() { "remote" } else { "local" }
        );
        Ok(Provisioner::from_config(
            &self.config,
            plan,
            endpoint.as_deref(),
            self.runner.clone(),
        ))
    }

    /// Lock retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> LockRetryPolicy {
        LockRetryPolicy::from(&self.config.retry)
    }

    /// Default orchestrator wait policy.
    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::from(&self.config.orchestrator)
    }
}

/// Creates the configured registry backend.
fn build_registry(
    config: &RegistryConfig,
    parser: &ConfigParser,
) -> Result<(Arc<dyn Registry>, Option<HttpRegistry>)> {
    match config.backend {
        RegistryBackend::Http => {
            let address = config.address.as_deref().ok_or_else(|| {
                ConfigError::validation("http registry requires an address", "registry.address")
            })?;
            let registry = HttpRegistry::new(address, config.skip_cert_verification)?;
            Ok((Arc::new(registry.clone()), Some(registry)))
        }
        RegistryBackend::Local => {
            let registry = match &config.path {
                Some(path) => LocalRegistry::with_base_dir(parser.resolve(path)),
                None => LocalRegistry::new()?,
            };
            Ok((Arc::new(registry), None))
        }
        RegistryBackend::Memory => Ok((Arc::new(MemoryRegistry::new()), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MockOrchestrator;
    use crate::runner::testing::ScriptedRunner;
    use std::path::PathBuf;

    fn config() -> EngineConfig {
        ConfigParser::new()
            .parse_yaml(
                r"
registry:
  backend: memory
provisioner:
  plans_dir: /srv/plans
plans:
  - name: openstack-plan
    directory: deploy-openstack
    config_key: TerraformVarsOpenstack
",
                None,
            )
            .expect("config")
    }

    fn deployment() -> Deployment {
        Deployment::new(
            config(),
            Manifest::default(),
            Arc::new(MemoryRegistry::new()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(MockOrchestrator::new()),
        )
    }

    #[test]
    fn test_unknown_plan() {
        let err = deployment().plan("missing").expect_err("unknown");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::UnknownPlan { ref name }) if name == "missing"
        ));
    }

    #[test]
    fn test_provisioner_for_plan() {
        let provisioner = deployment().provisioner("openstack-plan").expect("provisioner");
        assert_eq!(provisioner.plan(), "openstack-plan");
        assert_eq!(provisioner.path(), PathBuf::from("/srv/plans/deploy-openstack"));
    }

    #[test]
    fn test_policies_follow_config() {
        let d = deployment();
        assert_eq!(d.retry_policy(), LockRetryPolicy::default());
        assert_eq!(d.wait_policy().timeout.as_secs(), 600);
    }

    #[test]
    fn test_http_registry_requires_address() {
        let registry = RegistryConfig {
            backend: RegistryBackend::Http,
            address: None,
            path: None,
            skip_cert_verification: true,
        };
        assert!(build_registry(&registry, &ConfigParser::new()).is_err());
    }

    #[test]
    fn test_http_registry_exposes_state_endpoint() {
        let registry = RegistryConfig {
            backend: RegistryBackend::Http,
            address: Some(String::from("https://10.0.0.1:7000/1.0")),
            path: None,
            skip_cert_verification: true,
        };
        let (registry, http) = build_registry(&registry, &ConfigParser::new()).expect("registry");
        assert_eq!(registry.backend_type(), "http");
        assert!(http.is_some());
        assert_eq!(registry.state_endpoint().as_deref(), Some("https://10.0.0.1:7000/1.0"));
    }

    #[test]
    fn test_local_registry_resolves_against_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RegistryConfig {
            backend: RegistryBackend::Local,
            address: None,
            path: Some(PathBuf::from("registry")),
            skip_cert_verification: true,
        };
        let parser = ConfigParser::new().with_base_path(dir.path());
        let (registry, http) = build_registry(&registry, &parser).expect("registry");
        assert_eq!(registry.backend_type(), "local");
        assert!(http.is_none());
        assert!(registry.state_endpoint().is_none());
    }
}
