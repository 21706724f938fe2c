//! Provisioner variable reconciliation.
//!
//! Computes the variables handed to the provisioner for a plan from three
//! layers, lowest precedence first:
//!
//! 1. the variables persisted after the last successful apply, minus every
//!    manifest-derived variable that is not marked as preserved;
//! 2. values resolved from the deployment manifest;
//! 3. explicit overrides, where object values are merged key by key into
//!    the value they override.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigHasher, Manifest, TfvarMap};
use crate::error::{ConvergeError, RegistryError, Result};
use crate::registry::{Registry, read_config, update_config};

/// Provisioner input variables.
pub type VariableSet = Map<String, Value>;

/// Inputs of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    /// Registry key of the plan's persisted variables.
    pub plan_key: &'a str,
    /// Manifest-derived variable declaration.
    pub tfvars: &'a TfvarMap,
    /// Deployment manifest.
    pub manifest: &'a Manifest,
    /// Explicit overrides.
    pub overrides: Option<&'a VariableSet>,
    /// Restrict manifest resolution to these components.
    pub selected_components: Option<&'a [String]>,
    /// Write the result back to the registry.
    pub persist: bool,
}

impl<'a> ReconcileRequest<'a> {
    /// Creates a request that persists its result.
    #[must_use]
    pub const fn new(plan_key: &'a str, tfvars: &'a TfvarMap, manifest: &'a Manifest) -> Self {
        Self {
            plan_key,
            tfvars,
            manifest,
            overrides: None,
            selected_components: None,
            persist: true,
        }
    }

    /// Sets the overrides.
    #[must_use]
    pub const fn with_overrides(mut self, overrides: &'a VariableSet) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Restricts manifest resolution to `components`.
    #[must_use]
    pub const fn with_selected_components(mut self, components: &'a [String]) -> Self {
        self.selected_components = Some(components);
        self
    }

    /// Computes without writing to the registry.
    #[must_use]
    pub const fn without_persist(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Reconciles plan variables against the registry.
#[derive(Clone)]
pub struct VariableReconciler {
    registry: Arc<dyn Registry>,
}

impl std::fmt::Debug for VariableReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableReconciler")
            .field("registry", &self.registry.backend_type())
            .finish()
    }
}

impl VariableReconciler {
    /// Creates a reconciler backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Reads the persisted variables of a plan, empty if none.
    ///
    /// # Errors
    ///
    /// Returns an error on registry failure or if the stored value is not an
    /// object.
    pub async fn persisted(&self, plan_key: &str) -> Result<VariableSet> {
        Ok(read_config::<VariableSet>(self.registry.as_ref(), plan_key)
            .await?
            .unwrap_or_default())
    }

    /// Persists variables for a plan.
    ///
    /// # Errors
    ///
    /// Returns an error on registry failure.
    pub async fn persist(&self, plan_key: &str, variables: &VariableSet) -> Result<()> {
        let fingerprint = ConfigHasher::new().hash_value(&Value::Object(variables.clone()));
        info!(
            "Persisting {} variable(s) under {plan_key} ({})",
            variables.len(),
            ConfigHasher::short(&fingerprint)
        );
        update_config(self.registry.as_ref(), plan_key, variables).await
    }

    /// Computes the variables of a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read or, when persisting,
    /// written. Nothing is written if the read fails.
    pub async fn reconcile(&self, request: &ReconcileRequest<'_>) -> Result<VariableSet> {
        let persisted = self.persisted(request.plan_key).await.map_err(|e| match e {
            ConvergeError::Registry(RegistryError::Corrupted { key, message }) => {
                ConvergeError::Registry(RegistryError::Corrupted {
                    key,
                    message: format!("persisted variables must be an object: {message}"),
                })
            }
            other => other,
        })?;
        debug!(
            "Reconciling {} with {} persisted variable(s)",
            request.plan_key,
            persisted.len()
        );

        let variables = merge_variables(
            persisted,
            request.tfvars,
            request.manifest,
            request.overrides,
            request.selected_components,
        );

        if request.persist {
            self.persist(request.plan_key, &variables).await?;
        }

        Ok(variables)
    }
}

/// Merges the three variable layers.
#[must_use]
pub fn merge_variables(
    mut persisted: VariableSet,
    tfvars: &TfvarMap,
    manifest: &Manifest,
    overrides: Option<&VariableSet>,
    selected_components: Option<&[String]>,
) -> VariableSet {
    for name in tfvars.defaultable_names(selected_components) {
        persisted.remove(&name);
    }

    for binding in tfvars.bindings(selected_components) {
        if let Some(value) = manifest
            .attribute(binding.component, binding.attribute)
            .filter(is_truthy)
        {
            persisted.insert(binding.variable.to_string(), value);
        }
    }

    if let Some(overrides) = overrides {
        for (name, value) in overrides {
            let merged = match (persisted.remove(name), value) {
                (Some(Value::Object(mut base)), Value::Object(update)) => {
                    base.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Value::Object(base)
                }
                _ => value.clone(),
            };
            persisted.insert(name.clone(), merged);
        }
    }

    persisted
}

/// Null, `false`, zero, and empty strings, arrays and objects are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > f64::EPSILON),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
