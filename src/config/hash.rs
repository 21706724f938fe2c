//! Content fingerprints for change detection.
//!
//! Fingerprints are stable across runs: JSON objects hash in key order.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hasher for computing content fingerprints.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Fingerprint of a text blob.
    #[must_use]
    pub fn hash_text(&self, text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Fingerprint of a JSON document, independent of object key order.
    #[must_use]
    pub fn hash_value(&self, value: &Value) -> String {
        let mut hasher = Sha256::new();
        Self::feed(&mut hasher, value);
        hex::encode(hasher.finalize())
    }

    /// Short form for log lines.
    #[must_use]
    pub fn short(fingerprint: &str) -> &str {
        fingerprint.get(..12).unwrap_or(fingerprint)
    }

    fn feed(hasher: &mut Sha256, value: &Value) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                hasher.update(b"{");
                for key in keys {
                    hasher.update(key.as_bytes());
                    hasher.update(b":");
                    if let Some(inner) = map.get(key) {
                        Self::feed(hasher, inner);
                    }
                    hasher.update(b",");
                }
                hasher.update(b"}");
            }
            Value::Array(items) => {
                hasher.update(b"[");
                for item in items {
                    Self::feed(hasher, item);
                    hasher.update(b",");
                }
                hasher.update(b"]");
            }
            scalar => hasher.update(scalar.to_string().as_bytes()),
        }
    }
}
