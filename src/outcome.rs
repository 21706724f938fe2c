//! Tri-state outcome shared by every step.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConvergeError;

/// Kind of outcome a step reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The step did its work, or is eligible to run.
    Completed,
    /// The end state already holds.
    Skipped,
    /// The step could not complete.
    Failed,
}

/// Result of a skip-check or a step run.
///
/// Fields are read through accessors so a failed outcome can never lose its
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OutcomeRecord")]
pub struct Outcome {
    kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

/// Wire form of an [`Outcome`], checked before it becomes one.
#[derive(Deserialize)]
struct OutcomeRecord {
    kind: OutcomeKind,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl TryFrom<OutcomeRecord> for Outcome {
    type Error = String;

    fn try_from(record: OutcomeRecord) -> std::result::Result<Self, Self::Error> {
        let failed_without_reason = record.kind == OutcomeKind::Failed
            && record.message.as_deref().is_none_or(|m| m.trim().is_empty());
        if failed_without_reason {
            return Err(String::from("a FAILED outcome requires a non-empty message"));
        }
        Ok(Self {
            kind: record.kind,
            message: record.message,
            payload: record.payload,
        })
    }
}

const UNSPECIFIED_FAILURE: &str = "step failed without a reason";

impl Outcome {
    /// A completed outcome without message.
    #[must_use]
    pub const fn completed() -> Self {
        Self {
            kind: OutcomeKind::Completed,
            message: None,
            payload: None,
        }
    }

    /// A skipped outcome without message.
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            message: None,
            payload: None,
        }
    }

    /// A failed outcome. An empty message is replaced by a generic one.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            String::from(UNSPECIFIED_FAILURE)
        } else {
            message
        };
        Self {
            kind: OutcomeKind::Failed,
            message: Some(message),
            payload: None,
        }
    }

    /// A failed outcome carrying the display text of an error.
    #[must_use]
    pub fn from_error(error: &ConvergeError) -> Self {
        Self::failed(error.to_string())
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if self.kind == OutcomeKind::Failed && message.trim().is_empty() {
            return self;
        }
        self.message = Some(message);
        self
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Outcome kind.
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        self.kind
    }

    /// Human-readable message. Always present on failures.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Structured payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Returns true for completed outcomes.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.kind == OutcomeKind::Completed
    }

    /// Returns true for skipped outcomes.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.kind == OutcomeKind::Skipped
    }

    /// Returns true for failed outcomes.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.kind == OutcomeKind::Failed
    }
}

impl<T> From<crate::error::Result<T>> for Outcome {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(_) => Self::completed(),
            Err(e) => Self::from_error(&e),
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
