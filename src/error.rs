//! Error types for conversion operations

use std::fmt;

/// Errors that can occur during HTML to Markdown conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// Neither parser strategy could produce a tree
    ParseError(String),
    /// Byte input could not be decoded with the resolved charset
    EncodingError(String),
    /// Input rejected before parsing (binary signature, UTF-16, control characters)
    InvalidInput(String),
    /// A visitor callback returned an error outcome; carries its message verbatim
    VisitorAborted(String),
    /// A configured depth or size ceiling was hit
    ResourceLimitExceeded(String),
    /// Internal invariant violation
    InternalError(String),
}

impl ConversionError {
    /// Get numeric error code for FFI
    pub fn code(&self) -> u32 {
        match self {
            ConversionError::ParseError(_) => 1,
            ConversionError::EncodingError(_) => 2,
            ConversionError::InvalidInput(_) => 5,
            ConversionError::VisitorAborted(_) => 6,
            ConversionError::ResourceLimitExceeded(_) => 7,
            ConversionError::InternalError(_) => 99,
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConversionError::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            ConversionError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            ConversionError::VisitorAborted(msg) => write!(f, "{}", msg),
            ConversionError::ResourceLimitExceeded(msg) => {
                write!(f, "Resource limit exceeded: {}", msg)
            }
            ConversionError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ConversionError {}
