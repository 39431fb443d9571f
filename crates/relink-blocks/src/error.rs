//! Error types for the block codec
//!
//! Every variant carries the byte offset where parsing stopped, which the
//! corruption guard uses to tell whether a repair made progress.

/// Errors produced while parsing document text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// `<!-- wp:` without a terminating `-->`
    #[error("unterminated block delimiter at byte {offset}")]
    UnterminatedDelimiter { offset: usize },

    /// Delimiter comment that does not follow the grammar
    #[error("malformed block delimiter at byte {offset}: {message}")]
    MalformedDelimiter { offset: usize, message: String },

    /// Attribute JSON that does not parse, or is not an object
    #[error("invalid attributes for block '{block}' at byte {offset}: {message}")]
    InvalidAttributes {
        block: String,
        offset: usize,
        message: String,
    },

    /// Closing delimiter with no open block
    #[error("closing delimiter for '{block}' at byte {offset} has no matching opener")]
    UnexpectedCloser { block: String, offset: usize },

    /// Closing delimiter that names a different block than the open one
    #[error("closing delimiter for '{found}' at byte {offset} does not match open block '{expected}'")]
    MismatchedCloser {
        expected: String,
        found: String,
        offset: usize,
    },

    /// Opened block never closed before end of input
    #[error("block '{block}' opened at byte {offset} is never closed")]
    UnclosedBlock { block: String, offset: usize },
}

impl ParseError {
    /// Create malformed delimiter error
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::MalformedDelimiter {
            offset,
            message: message.into(),
        }
    }

    /// Byte offset the error refers to
    #[must_use]
    pub fn offset(&self) -> usize {
        match self {
            Self::UnterminatedDelimiter { offset }
            | Self::MalformedDelimiter { offset, .. }
            | Self::InvalidAttributes { offset, .. }
            | Self::UnexpectedCloser { offset, .. }
            | Self::MismatchedCloser { offset, .. }
            | Self::UnclosedBlock { offset, .. } => *offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = ParseError::UnexpectedCloser {
            block: "core/image".into(),
            offset: 12,
        };
        assert_eq!(
            err.to_string(),
            "closing delimiter for 'core/image' at byte 12 has no matching opener"
        );
        assert_eq!(err.offset(), 12);
    }

    #[test]
    fn malformed_helper() {
        let err = ParseError::malformed(3, "missing whitespace");
        assert!(err.to_string().contains("missing whitespace"));
        assert_eq!(err.offset(), 3);
    }
}
