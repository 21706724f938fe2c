//! Per-plan declaration of manifest-derived variables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Maps manifest component attributes to provisioner variables.
///
/// ```yaml
/// components:
///   mysql-k8s:
///     channel: mysql-channel
///     revision: mysql-revision
///     config: mysql-config
/// preserve: [mysql-config]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TfvarMap {
    /// `component -> attribute -> variable`.
    #[serde(default)]
    pub components: BTreeMap<String, BTreeMap<String, String>>,
    /// Variables never dropped when defaults are recomputed.
    #[serde(default)]
    pub preserve: BTreeSet<String>,
}

/// One `component.attribute -> variable` binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfvarBinding<'a> {
    /// Manifest component.
    pub component: &'a str,
    /// Attribute of the component.
    pub attribute: &'a str,
    /// Provisioner variable.
    pub variable: &'a str,
}

impl TfvarMap {
    /// Adds a binding.
    #[must_use]
    pub fn with_binding(
        mut self,
        component: impl Into<String>,
        attribute: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        self.components
            .entry(component.into())
            .or_default()
            .insert(attribute.into(), variable.into());
        self
    }

    /// Marks a variable as preserved.
    #[must_use]
    pub fn with_preserved(mut self, variable: impl Into<String>) -> Self {
        self.preserve.insert(variable.into());
        self
    }

    /// Bindings of the selected components, or of all components.
    pub fn bindings<'a>(
        &'a self,
        selected: Option<&'a [String]>,
    ) -> impl Iterator<Item = TfvarBinding<'a>> + 'a {
        self.components
            .iter()
            .filter(move |(component, _)| {
                selected.is_none_or(|names| names.iter().any(|n| n == *component))
            })
            .flat_map(|(component, attributes)| {
                attributes.iter().map(move |(attribute, variable)| TfvarBinding {
                    component: component.as_str(),
                    attribute: attribute.as_str(),
                    variable: variable.as_str(),
                })
            })
    }

    /// Variables that are recomputed from the manifest on every run.
    #[must_use]
    pub fn defaultable_names(&self, selected: Option<&[String]>) -> BTreeSet<String> {
        self.bindings(selected)
            .map(|b| b.variable)
            .filter(|v| !self.preserve.contains(*v))
            .map(str::to_string)
            .collect()
    }

    /// Variables declared more than once, which would shadow each other.
    #[must_use]
    pub fn duplicate_variables(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for binding in self.bindings(None) {
            if !seen.insert(binding.variable) {
                duplicates.insert(binding.variable.to_string());
            }
        }
        duplicates.into_iter().collect()
    }
}
