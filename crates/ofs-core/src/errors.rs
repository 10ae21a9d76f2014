//! Error payloads for plan loading, field construction and export writing.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detail carried by every [`OfsError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short kebab-case tag naming the failing site, e.g. `plan-parse`.
    pub code: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// Offending inputs: the plan or export path, the field value rejected.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// What to change in the plan or environment, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates an error payload with the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Records an offending input under `key`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Records the file or directory the failure refers to under `key`.
    pub fn with_path(self, key: &str, path: &Path) -> Self {
        self.with_context(key, path.display().to_string())
    }

    /// Attaches a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Failures at the edges of a run.
///
/// Runner state machines never return errors; these variants cover plan
/// loading, field construction and export encoding around them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum OfsError {
    /// Unreadable plan file or rejected plan value.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Field parameters the backend cannot be built from.
    #[error("backend error: {0}")]
    Backend(ErrorInfo),
    /// Output directory or export file could not be written.
    #[error("export error: {0}")]
    Export(ErrorInfo),
    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        let mut entries = self.context.iter();
        if let Some((key, value)) = entries.next() {
            write!(f, " [{key}={value}")?;
            for (key, value) in entries {
                write!(f, ", {key}={value}")?;
            }
            write!(f, "]")?;
        }
        match &self.hint {
            Some(hint) => write!(f, " (hint: {hint})"),
            None => Ok(()),
        }
    }
}

impl OfsError {
    /// Returns the payload carried by any variant.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            OfsError::Config(info)
            | OfsError::Backend(info)
            | OfsError::Export(info)
            | OfsError::Serde(info) => info,
        }
    }
}
