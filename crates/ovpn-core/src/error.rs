//! Parse errors for daemon notification lines.

use thiserror::Error;

/// Errors produced while interpreting a notification line that belongs to
/// a recognized prefix family.
///
/// A parse error never aborts the management read loop; the offending line
/// counts as consumed and the error is surfaced to whoever asked for the
/// data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A state notification carried a name outside the closed enumeration.
    #[error("unrecognized daemon state: {0}")]
    UnknownState(String),

    /// A field inside a recognized line could not be interpreted.
    #[error("failed to parse {field}: {reason}")]
    MalformedField { field: String, reason: String },
}

impl ParseError {
    /// Builds a `MalformedField` error without format boilerplate at call sites.
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
