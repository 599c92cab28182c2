//! Error types for XML parsing and writing.

use std::io;

/// Errors raised while parsing or writing XML.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// An I/O error during XML writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An error from the underlying quick-xml library.
    #[error("XML processing error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    /// Markup the parser cannot make sense of.
    #[error("malformed XML: {0}")]
    Syntax(String),

    /// A closing tag that does not match the innermost open tag.
    #[error("mismatched closing tag at {path}: expected </{expected}>, found </{found}>")]
    MismatchedTag {
        /// Path of the innermost open element.
        path: String,
        /// Name of the innermost open element.
        expected: String,
        /// Name of the closing tag encountered.
        found: String,
    },

    /// The body ended before every element was closed.
    #[error("document ended with {depth} unclosed element(s) at {path}")]
    Truncated {
        /// Number of elements still open.
        depth: usize,
        /// Path of the innermost open element.
        path: String,
    },

    /// A value could not be coerced to the type the grammar declares.
    #[error("invalid value at {path}: {message}")]
    Parse {
        /// Slash-separated tag path of the offending element.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A required XML element was missing.
    #[error("missing required XML element: {0}")]
    MissingElement(String),
}

impl XmlError {
    /// Tag path the error refers to, when it has one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::MismatchedTag { path, .. } | Self::Truncated { path, .. } | Self::Parse { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }
}
