//! Error types for the Lattice network pipeline
//!
//! Errors are structured with fields so they can be surfaced verbatim to
//! status reporting. Validation and change-safety checks return complete
//! lists of these errors rather than stopping at the first one.

use thiserror::Error;

/// Main error type for Lattice network operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Arity or required-field violation (e.g. wrong number of service networks)
    #[error("invalid {field}: {message}")]
    Structural {
        /// The offending field path (e.g., "spec.serviceNetwork")
        field: String,
        /// Description of what's invalid
        message: String,
    },

    /// Parse failure or constraint violation on a structurally valid field
    #[error("invalid {field}: {message}")]
    Semantic {
        /// The offending field path (e.g., "spec.clusterNetwork[0].cidr")
        field: String,
        /// Description of what's invalid
        message: String,
    },

    /// A field that infrastructure was already bootstrapped around has changed
    #[error("cannot change {field}: {message}")]
    UnsafeChange {
        /// The field that changed
        field: String,
        /// Why the change is rejected
        message: String,
    },

    /// The default network type tag names no known provider
    #[error("unsupported default network type: {network_type}")]
    UnsupportedType {
        /// The unrecognized type tag
        network_type: String,
    },

    /// Bootstrap facts needed by a provider are missing or not ready
    #[error("bootstrap facts unavailable [{provider}]: {message}")]
    DiscoveryUnavailable {
        /// Provider that needed the facts
        provider: String,
        /// What was missing
        message: String,
    },

    /// The reconcile pass was rejected during the given phase
    #[error("{phase} failed with {} error(s): {}", errors.len(), join_errors(errors))]
    Rejected {
        /// Phase that rejected the pass ("validation" or "change safety")
        phase: String,
        /// Every violation found
        errors: Vec<Error>,
    },

    /// Render received input that validation should have rejected
    #[error("render contract violation [{provider}]: {message}")]
    RenderContract {
        /// Provider whose render failed
        provider: String,
        /// Description of the malformed input
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Configuration file could not be loaded
    #[error("configuration error [{context}]: {message}")]
    Config {
        /// Description of what failed
        message: String,
        /// Where the configuration came from (file path, "default", ...)
        context: String,
    },
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a structural (arity / required field) error
    pub fn structural(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Structural {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a semantic (parse / constraint) error
    pub fn semantic(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Semantic {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create an unsafe-change error
    pub fn unsafe_change(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UnsafeChange {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create an unsupported network type error
    pub fn unsupported_type(network_type: impl Into<String>) -> Self {
        Self::UnsupportedType {
            network_type: network_type.into(),
        }
    }

    /// Create a discovery-unavailable error for a provider
    pub fn discovery_unavailable(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DiscoveryUnavailable {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a rejection carrying every violation found in a phase
    pub fn rejected(phase: impl Into<String>, errors: Vec<Error>) -> Self {
        Self::Rejected {
            phase: phase.into(),
            errors,
        }
    }

    /// Create a render contract violation error
    pub fn render_contract(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RenderContract {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration loading error
    pub fn config(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for errors produced by `validate` (structural or semantic)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Structural { .. } | Self::Semantic { .. })
    }

    /// The violations carried by a rejection, or an empty slice otherwise
    pub fn violations(&self) -> &[Error] {
        match self {
            Self::Rejected { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_display() {
        let err = Error::structural("spec.serviceNetwork", "expected exactly 1 entry, got 0");
        assert_eq!(
            err.to_string(),
            "invalid spec.serviceNetwork: expected exactly 1 entry, got 0"
        );
        assert!(err.is_validation());
    }

    #[test]
    fn test_unsafe_change_display() {
        let err = Error::unsafe_change("spec.disableMultiNetwork", "multus is already deployed");
        assert!(err.to_string().starts_with("cannot change spec.disableMultiNetwork"));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_rejected_lists_every_error() {
        let err = Error::rejected(
            "validation",
            vec![
                Error::structural("a", "first"),
                Error::semantic("b", "second"),
            ],
        );
        let msg = err.to_string();
        assert!(msg.contains("2 error(s)"));
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn test_violations_empty_for_other_variants() {
        assert!(Error::unsupported_type("Calico").violations().is_empty());
    }

    #[test]
    fn test_serde_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { kind: None, .. }));
    }
}
