//! Error types
//!
//! [`FactsError`] is what a host sees when an invocation is aborted. Every
//! variant denotes a caller bug (bad parameters, a descriptor that cannot
//! dispatch) or an unusable environment. Cloud-side read failures never
//! appear here; they degrade to an empty result set.

use thiserror::Error;

/// Fatal errors surfaced to the host
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FactsError {
    /// The parameter mapping contains a key the schema does not declare.
    #[error("unsupported parameter: {0}")]
    UnknownParameter(String),

    /// A required parameter has no value.
    #[error("missing required parameter(s): {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    /// A supplied value cannot be coerced to the declared kind.
    #[error("parameter {name} expects {expected}: {detail}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        detail: String,
    },

    /// No dispatch rule matched the bound parameters.
    #[error("no read operation applies to the supplied parameters ({0})")]
    Undispatchable(String),

    /// The management client could not be constructed.
    #[error("management client unavailable: {0}")]
    ClientUnavailable(String),

    /// The host asked for a descriptor id that is not registered.
    #[error("unknown fact module: {0}")]
    UnknownDescriptor(String),
}

impl FactsError {
    /// Stable category name, used in host-facing failure output
    pub fn kind(&self) -> &'static str {
        match self {
            FactsError::UnknownParameter(_) => "unknown_parameter",
            FactsError::MissingRequired(_) => "missing_required",
            FactsError::TypeMismatch { .. } => "type_mismatch",
            FactsError::Undispatchable(_) => "undispatchable",
            FactsError::ClientUnavailable(_) => "client_unavailable",
            FactsError::UnknownDescriptor(_) => "unknown_descriptor",
        }
    }
}
