//! Error types for the relinking engine
//!
//! Only two conditions abort a relink: the input does not parse, or the
//! corruption guard cannot restore a valid document. Everything else is
//! recorded in the [`RelinkReport`].

use crate::report::RelinkReport;
use relink_blocks::ParseError;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum RelinkError {
    /// Input document is not a well-formed block tree
    #[error("document does not parse: {0}")]
    Parse(#[from] ParseError),

    /// Output failed validation; nothing may be persisted
    #[error("document was not modified: {message}")]
    Fatal {
        /// Human readable reason
        message: String,
        /// Report built up to the failure
        report: Box<RelinkReport>,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pattern repository failure
    #[error("pattern repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl RelinkError {
    /// Check if the error means the caller must keep the original document
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Fatal { .. })
    }

    /// Report attached to a fatal error
    #[must_use]
    pub fn report(&self) -> Option<&RelinkReport> {
        match self {
            Self::Fatal { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value out of range or inconsistent
    #[error("invalid value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },

    /// TOML syntax or schema error
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base URL that cannot be used as a rebase target
    #[error("invalid base url '{url}': {message}")]
    BaseUrl { url: String, message: String },
}

impl ConfigError {
    /// Create invalid-value error
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Corruption guard failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// Output does not parse, even after every repair
    #[error("output does not parse after {} repair(s): {error}", attempted.len())]
    Unparseable {
        /// Last parse error
        error: ParseError,
        /// Repairs that were tried
        attempted: Vec<String>,
    },

    /// Output parses but its block structure differs from the input tree
    #[error("block structure changed at position {position}: expected {expected}, found {found}")]
    StructureChanged {
        position: usize,
        expected: String,
        found: String,
    },
}

/// Pattern repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No repository was configured on the engine
    #[error("no pattern repository configured")]
    NotConfigured,

    /// Storage could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Stored map is not valid
    #[error("stored pattern map is corrupt: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_is_fatal() {
        let err = RelinkError::from(ParseError::UnterminatedDelimiter { offset: 3 });
        assert!(err.is_fatal());
        assert!(err.report().is_none());
        assert_eq!(
            err.to_string(),
            "document does not parse: unterminated block delimiter at byte 3"
        );
    }

    #[test]
    fn repository_error_is_not_fatal() {
        let err = RelinkError::from(RepositoryError::NotConfigured);
        assert!(!err.is_fatal());
    }

    #[test]
    fn guard_error_display() {
        let err = GuardError::Unparseable {
            error: ParseError::UnclosedBlock {
                block: "core/image".into(),
                offset: 0,
            },
            attempted: vec!["html-entity-quotes".into()],
        };
        assert_eq!(
            err.to_string(),
            "output does not parse after 1 repair(s): block 'core/image' opened at byte 0 is never closed"
        );
    }
}
