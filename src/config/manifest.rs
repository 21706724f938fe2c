//! Deployment manifest types.
//!
//! The manifest pins what software the cluster runs: a core section plus
//! any number of extensions, each listing components with their channel,
//! revision and configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Deployment manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Core software.
    #[serde(default)]
    pub core: SoftwareSection,
    /// Extensions, searched in declaration order after the core.
    #[serde(default)]
    pub extensions: Vec<Extension>,
}

/// A registered extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Extension {
    /// Extension name.
    pub name: String,
    /// Software the extension deploys.
    #[serde(default)]
    pub software: Software,
}

/// Section wrapping a software list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SoftwareSection {
    /// Software list.
    #[serde(default)]
    pub software: Software,
}

/// Components pinned by a section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Software {
    /// Components by name.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentManifest>,
}

/// Pinning of a single component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentManifest {
    /// Channel to track (e.g. `8.0/stable`).
    #[serde(default)]
    pub channel: Option<String>,
    /// Pinned revision.
    #[serde(default)]
    pub revision: Option<u64>,
    /// Configuration options.
    #[serde(default)]
    pub config: Option<serde_json::Map<String, Value>>,
    /// Any other attribute.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Manifest {
    /// Finds a component: core first, then each extension in order.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentManifest> {
        self.core.software.components.get(name).or_else(|| {
            self.extensions
                .iter()
                .find_map(|ext| ext.software.components.get(name))
        })
    }

    /// Resolves `component.attribute`, if both are present.
    #[must_use]
    pub fn attribute(&self, component: &str, attribute: &str) -> Option<Value> {
        self.component(component)?.attribute(attribute)
    }

    /// Adds a core component.
    #[must_use]
    pub fn with_core_component(mut self, name: impl Into<String>, component: ComponentManifest) -> Self {
        self.core.software.components.insert(name.into(), component);
        self
    }
}

impl ComponentManifest {
    /// Returns an attribute as JSON.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "channel" => self.channel.clone().map(Value::String),
            "revision" => self.revision.map(Value::from),
            "config" => self.config.clone().map(Value::Object),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Track part of the channel (`8.0` in `8.0/stable`).
    #[must_use]
    pub fn channel_track(&self) -> Option<&str> {
        self.channel.as_deref().and_then(|c| c.split('/').next())
    }
}
