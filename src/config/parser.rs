//! Configuration parser for loading engine configuration and manifests.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, ConvergeError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::manifest::Manifest;
use super::spec::{EngineConfig, RegistryBackend};

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Resolves a path against the base path.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_source(path)?;
        let mut config = self.parse_yaml(&content, Some(path))?;

        config.provisioner.plans_dir = self.resolve(&config.provisioner.plans_dir);
        if let Some(registry_dir) = config.registry.path.take() {
            config.registry.path = Some(self.resolve(&registry_dir));
        }

        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration with {} plan(s)", config.plans.len());
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `CONVERGE_<SECTION>_<KEY>` (e.g. `CONVERGE_REGISTRY_ADDRESS`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;

        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut EngineConfig) {
        if let Ok(address) = std::env::var("CONVERGE_REGISTRY_ADDRESS") {
            debug!("Overriding registry.address from environment");
            config.registry.address = Some(address);
            config.registry.backend = RegistryBackend::Http;
        }

        if let Ok(binary) = std::env::var("CONVERGE_PROVISIONER_BINARY") {
            debug!("Overriding provisioner.binary from environment");
            config.provisioner.binary = PathBuf::from(binary);
        }

        if let Ok(model) = std::env::var("CONVERGE_ORCHESTRATOR_MODEL") {
            debug!("Overriding orchestrator.model from environment");
            config.orchestrator.model = model;
        }
    }

    /// Loads the deployment manifest referenced by the configuration.
    ///
    /// A configuration without manifest yields an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest file cannot be read or parsed.
    pub fn load_manifest(&self, config: &EngineConfig) -> Result<Manifest> {
        let Some(path) = &config.manifest else {
            warn!("No manifest configured, using an empty one");
            return Ok(Manifest::default());
        };

        let path = self.resolve(path);
        info!("Loading manifest from: {}", path.display());

        let content = read_source(&path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("Manifest parse error: {e}"),
                location: Some(path.display().to_string()),
            })
        })
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConvergeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn read_source(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ConvergeError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        ConvergeError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["converge.yaml", "converge.yml"];

/// Per-user configuration file (`~/.config/converge/converge.yaml` on Linux).
fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("converge").join(DEFAULT_CONFIG_FILES[0]))
        .filter(|path| path.exists())
}

/// Finds the configuration file in the current directory or parent
/// directories, falling back to the per-user configuration file.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    if let Some(config_path) = user_config_file() {
        info!("Using user configuration file: {}", config_path.display());
        return Ok(config_path);
    }

    Err(ConvergeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
