//! Error types for the model decoders.

use thiserror::Error;

/// Broad classification of a decode failure.
///
/// Every [`Error`] is fatal to the decode call that produced it. The kind
/// tells the caller whether the input was malformed or merely uses
/// something this crate does not implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed, truncated or unsupported-version input.
    Format,
    /// A recognized but unimplemented node kind, codec or decoder name.
    Unsupported,
}

/// Main error type for decoding operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Leading magic bytes do not identify the expected stream
    #[error("Invalid {what} header: 0x{found:08X}")]
    InvalidMagic { what: &'static str, found: u32 },

    /// Stream version is outside the supported range
    #[error("Unsupported {what} version: {version}")]
    UnsupportedVersion { what: &'static str, version: u32 },

    /// Input ended before a read of `needed` bytes at `pos`
    #[error("Unexpected end of data at position {pos} (needed {needed} bytes)")]
    UnexpectedEof { pos: usize, needed: usize },

    /// Invalid data structure in the stream
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    /// Decompressed or decoded length differs from the declared length
    #[error("Size mismatch in {what}: expected {expected}, got {actual}")]
    SizeMismatch { what: &'static str, expected: usize, actual: usize },

    /// Compression backend rejected its input
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// Recognized but unimplemented feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Value tree node has a different shape than requested
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Object lacks a required key
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl Error {
    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create an unsupported feature error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a type mismatch error.
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::Unsupported,
            _ => ErrorKind::Format,
        }
    }

    /// True for malformed-input failures.
    #[inline]
    pub fn is_format(&self) -> bool {
        self.kind() == ErrorKind::Format
    }
}

/// Result type alias for decoding operations.
pub type Result<T> = std::result::Result<T, Error>;
