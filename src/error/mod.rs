//! Error types and diagnostics.
//!
//! Parse failures carry line, column, and byte offset information. The
//! parsers support a **recovery mode** in which problems are collected into
//! a `Vec<ParseDiagnostic>` on the tree while a (possibly partial) document
//! is still produced.
//!
//! [`Error`] is the taxonomy surfaced by the handle API in
//! [`crate::element`]: every fallible navigation, accessor, mutation, or
//! query operation returns it.

use std::fmt;

use crate::xpath::XPathError;

/// Severity level for a parse diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// A non-fatal issue that doesn't prevent parsing.
    Warning,
    /// A recoverable error: the parser continued but the input is malformed.
    Error,
    /// An unrecoverable error. Parsing stopped.
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Source location within a markup document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (in characters, not bytes).
    pub column: u32,
    /// 0-based byte offset from the start of the (UTF-8) input.
    pub byte_offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single diagnostic emitted during parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{severity}: {message} at {location}")]
pub struct ParseDiagnostic {
    /// The severity of this diagnostic.
    pub severity: ErrorSeverity,
    /// Human-readable message.
    pub message: String,
    /// Where in the source this occurred.
    pub location: SourceLocation,
}

/// The error returned when a document cannot be loaded.
///
/// Produced for unrecoverable syntax errors in XML mode, for empty or
/// undecodable input, and for inputs without a root element. A parse failure
/// never yields a partially built document.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at {location}: {message}")]
pub struct ParseError {
    /// The primary error message.
    pub message: String,
    /// Where in the source the fatal error occurred.
    pub location: SourceLocation,
    /// Diagnostics collected before the fatal error.
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParseError {
    /// Creates a parse error without location information.
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: SourceLocation::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Returns the byte offset of the failure, if it is known.
    #[must_use]
    pub fn byte_offset(&self) -> Option<usize> {
        (self.location.line > 0).then_some(self.location.byte_offset)
    }
}

/// Errors raised by the handle API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The input could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The handle's node was removed from its document.
    #[error("node handle is no longer attached to its document")]
    NodeInvalid,

    /// The XPath expression is malformed or could not be evaluated.
    #[error(transparent)]
    Query(XPathError),

    /// A namespace prefix or URI is not declared where it is used.
    #[error("unknown namespace '{0}'")]
    UnknownNamespace(String),

    /// A tag or attribute name is not a legal XML name.
    #[error("invalid name '{0}'")]
    InvalidName(String),

    /// The operation does not apply to this node or would break the tree.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
}

impl From<XPathError> for Error {
    fn from(err: XPathError) -> Self {
        match err {
            XPathError::UnknownNamespace { prefix } => Self::UnknownNamespace(prefix),
            other => Self::Query(other),
        }
    }
}

/// Result alias used throughout the handle API.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation {
            line: 10,
            column: 5,
            byte_offset: 42,
        };
        assert_eq!(loc.to_string(), "10:5");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            message: "unexpected end of input".to_string(),
            location: SourceLocation {
                line: 1,
                column: 15,
                byte_offset: 14,
            },
            diagnostics: vec![],
        };
        assert_eq!(
            err.to_string(),
            "parse error at 1:15: unexpected end of input"
        );
        assert_eq!(err.byte_offset(), Some(14));
    }

    #[test]
    fn test_parse_error_without_location() {
        let err = ParseError::new("empty document");
        assert_eq!(err.byte_offset(), None);
    }

    #[test]
    fn test_parse_diagnostic_display() {
        let diag = ParseDiagnostic {
            severity: ErrorSeverity::Warning,
            message: "attribute value not quoted".to_string(),
            location: SourceLocation {
                line: 3,
                column: 10,
                byte_offset: 50,
            },
        };
        assert_eq!(
            diag.to_string(),
            "warning: attribute value not quoted at 3:10"
        );
    }

    #[test]
    fn test_unknown_namespace_is_lifted_from_xpath() {
        let err: Error = XPathError::UnknownNamespace {
            prefix: "svg".to_string(),
        }
        .into();
        assert!(matches!(err, Error::UnknownNamespace(ref p) if p == "svg"));

        let err: Error = XPathError::UndefinedFunction {
            name: "frob".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Query(_)));
    }
}
