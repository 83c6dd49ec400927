// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for podplacer model conversions
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A required field was missing from a resource
    #[error("{kind} is missing required field '{field}'")]
    #[diagnostic(
        code(podplacer::core::missing_field),
        help("The control plane returned an incomplete object. Check the API server version")
    )]
    MissingField {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        field: String,
    },

    /// Invalid resource
    #[error("Invalid {kind} '{name}': {reason}")]
    #[diagnostic(code(podplacer::core::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn missing_field(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            kind: kind.into(),
            field: field.into(),
        }
    }

    pub fn invalid_resource(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidResource {
            kind: kind.into(),
            name: name.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }
}
