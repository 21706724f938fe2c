//! Detection of a locked remote state.
//!
//! The provisioner reports lock contention only through its stderr text.
//! The markers are kept behind a versioned signature so that a provisioner
//! release changing the wording needs a new signature, not adapter changes.

/// Versioned set of stderr markers meaning "remote state already locked".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSignature {
    version: String,
    markers: Vec<String>,
}

impl LockSignature {
    /// Markers emitted by the HTTP state backend of provisioner 1.x.
    #[must_use]
    pub fn v1() -> Self {
        Self {
            version: String::from("v1"),
            markers: vec![String::from("remote state already locked")],
        }
    }

    /// A custom signature.
    #[must_use]
    pub fn custom<I, S>(version: impl Into<String>, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Signature version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns true if `stderr` reports a locked remote state.
    #[must_use]
    pub fn matches(&self, stderr: &str) -> bool {
        self.markers.iter().any(|marker| stderr.contains(marker.as_str()))
    }
}

impl Default for LockSignature {
    fn default() -> Self {
        Self::v1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_matches_http_backend_message() {
        let stderr = "Error: Error acquiring the state lock\n\nError message: HTTP remote state already locked: ID=abc";
        assert!(LockSignature::v1().matches(stderr));
        assert!(!LockSignature::v1().matches("Error: Invalid provider configuration"));
    }

    #[test]
    fn test_custom_signature() {
        let signature = LockSignature::custom("v2", ["state is locked by"]);
        assert_eq!(signature.version(), "v2");
        assert!(signature.matches("Error: state is locked by ubuntu@node-1"));
        assert!(!signature.matches("remote state already locked"));
    }
}
