//! Structured failure reporting.
//!
//! A [`Reason`] explains a single failure with a message and a metadata map.
//! An [`Error`] is a reason that additionally owns an ordered list of child
//! errors, forming a tree of root cause plus contributing causes. Both are
//! plain data: construction never fails, and equality is structural over
//! message, metadata, and (for errors) the ordered children.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single explanation for a domain failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, serde_json::Value>,
}

impl Reason {
    /// Creates a reason with the given message and no metadata.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the metadata map.
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Sets a metadata entry. The last write for a given key wins.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the metadata value for `key`, if present.
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A domain error: a reason with an ordered list of contributing causes.
///
/// An error with no children acts as a leaf reason. Children keep append
/// order, first detected first, so callers can inspect every contributing
/// cause rather than only the first failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Error {
    message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<Error>,
}

impl Error {
    /// Creates an error with the given message and no reasons or metadata.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata: HashMap::new(),
            reasons: Vec::new(),
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the metadata map.
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Returns the metadata value for `key`, if present.
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Returns the contributing causes in append order.
    pub fn reasons(&self) -> &[Error] {
        &self.reasons
    }

    /// Returns true if this error has contributing causes.
    pub fn has_reasons(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Appends a contributing cause, preserving append order.
    pub fn with_reason(mut self, reason: impl Into<Error>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Appends a contributing cause in place.
    pub fn push_reason(&mut self, reason: impl Into<Error>) {
        self.reasons.push(reason.into());
    }

    /// Sets a metadata entry. The last write for a given key wins.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Visits this error and every descendant, depth first, parents before
    /// children.
    pub fn flatten(&self) -> impl Iterator<Item = &Error> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            for child in node.reasons.iter().rev() {
                stack.push(child);
            }
            Some(node)
        })
    }
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Self {
        Self {
            message: reason.message,
            metadata: reason.metadata,
            reasons: Vec::new(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.reasons.is_empty() {
            write!(f, " (")?;
            for (i, reason) in self.reasons.iter().enumerate() {
                if i > 0 {
                    write!(f, "; ")?;
                }
                write!(f, "{}", reason)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}
