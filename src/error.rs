//! Error types for PDF optimization and serialization

use std::io;
use thiserror::Error;

/// Main error type for PDF optimization operations
#[derive(Error, Debug)]
pub enum PDFOptError {
    /// Object graph is structurally broken
    #[error("Corrupt object graph: {0}")]
    CorruptGraph(String),

    /// Dictionary Type or Subtype not the expected value
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// Required dictionary entry absent
    #[error("Missing required dictionary entry: {0}")]
    MissingEntry(String),

    /// Encryption requested or updated in an invalid state
    #[error("Encryption misuse: {0}")]
    EncryptionMisuse(String),

    /// Stream filter this core does not carry
    #[error("Unsupported stream filter: {0}")]
    UnsupportedFilter(String),

    /// Invalid key length for a crypto provider
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// Invalid data length for a crypto operation
    #[error("Invalid data length for {operation}")]
    InvalidDataLength { operation: String },

    /// Flate compression or decompression failed
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// A structural invariant of the xref table or writer was violated
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Object not found in the xref table
    #[error("Object not found: {0}")]
    ObjectNotFound(u32),

    /// Underlying sink failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for PDF optimization operations
pub type PDFOptResult<T> = Result<T, PDFOptError>;

impl PDFOptError {
    /// Create a new corrupt-graph error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptGraph(msg.into())
    }

    /// Create a new missing-entry error
    pub fn missing(entry: impl Into<String>) -> Self {
        Self::MissingEntry(entry.into())
    }

    /// Create a new invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a new encryption-misuse error
    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::EncryptionMisuse(msg.into())
    }

    /// Check if error concerns the document structure
    pub fn is_structure_error(&self) -> bool {
        matches!(
            self,
            Self::CorruptGraph(_)
                | Self::TypeMismatch { .. }
                | Self::MissingEntry(_)
                | Self::ObjectNotFound(_)
        )
    }

    /// Check if error concerns encryption state or primitives
    pub fn is_encryption_error(&self) -> bool {
        matches!(
            self,
            Self::EncryptionMisuse(_) | Self::InvalidKeyLength(_) | Self::InvalidDataLength { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PDFOptError::corrupt("Kids entry is not an array");
        assert!(matches!(err, PDFOptError::CorruptGraph(_)));

        let err = PDFOptError::missing("Count");
        assert!(matches!(err, PDFOptError::MissingEntry(_)));

        let err = PDFOptError::invariant("free list loop at obj 3");
        assert!(matches!(err, PDFOptError::InvariantViolation(_)));
    }

    #[test]
    fn test_error_categorization() {
        let struct_err = PDFOptError::missing("BaseFont");
        assert!(struct_err.is_structure_error());
        assert!(!struct_err.is_encryption_error());

        let enc_err = PDFOptError::InvalidKeyLength(7);
        assert!(enc_err.is_encryption_error());
        assert!(!enc_err.is_structure_error());
    }

    #[test]
    fn test_error_display() {
        let err = PDFOptError::TypeMismatch {
            expected: "Dict",
            found: "Array".to_string(),
        };
        assert_eq!(err.to_string(), "Type mismatch: expected Dict, found Array");

        let err = PDFOptError::ObjectNotFound(42);
        assert_eq!(err.to_string(), "Object not found: 42");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "sink closed");
        let err: PDFOptError = io_err.into();
        assert!(matches!(err, PDFOptError::Io(_)));
    }
}
