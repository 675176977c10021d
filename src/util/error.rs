//! Error types for scene baking and model loading.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Coarse classification of an [`Error`].
///
/// Callers that only care about "what went wrong" (retry, rebuild, give up)
/// match on this instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A source file or artifact does not exist.
    NotFound,
    /// Reading or writing failed.
    IoFailure,
    /// An artifact does not carry the expected type tag, version or layout.
    FormatMismatch,
    /// Artifacts (or the data inside them) disagree with each other.
    Inconsistent,
    /// API misuse or anything else.
    Other,
}

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// I/O failure on a known path
    #[error("I/O error on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact header does not match what the loader expects
    #[error("Format mismatch in {what}: expected {expected}, got {actual}")]
    FormatMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    /// Buffer ends before a field or block could be read
    #[error("Unexpected end of buffer at position {0}")]
    UnexpectedEof(u64),

    /// A pointer field points outside of its buffer
    #[error("Pointer offset {offset} (size {size}) is outside of a {len} byte buffer")]
    InvalidOffset { offset: u64, size: u64, len: u64 },

    /// A pointer block does not satisfy the required alignment
    #[error("Block at offset {offset} is not aligned to {alignment} bytes")]
    Misaligned { offset: u64, alignment: usize },

    /// Artifacts or their contents disagree with each other
    #[error("Inconsistent data: {0}")]
    Inconsistent(String),

    /// Build context used before `initialize`
    #[error("Build context used before initialize")]
    ContextNotInitialized,

    /// Texture could not be provided by the texture loader
    #[error("Texture '{name}' unavailable: {reason}")]
    Texture { name: String, reason: String },

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an inconsistency error.
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    /// Create a format mismatch error.
    pub fn mismatch(
        what: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::FormatMismatch {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Wrap an I/O error that happened on `path`, keeping "not found" distinct.
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::FileIo {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::FileIo { .. } | Self::Io(_) => ErrorKind::IoFailure,
            Self::FormatMismatch { .. }
            | Self::UnexpectedEof(_)
            | Self::InvalidOffset { .. }
            | Self::Misaligned { .. }
            | Self::Utf8(_) => ErrorKind::FormatMismatch,
            Self::Inconsistent(_) => ErrorKind::Inconsistent,
            Self::ContextNotInitialized | Self::Texture { .. } | Self::Config(_) | Self::Other(_) => {
                ErrorKind::Other
            }
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::mismatch("ModelResource", 3u64, 4u64);
        assert!(e.to_string().contains("ModelResource"));
        assert!(e.to_string().contains('3'));
        assert!(e.to_string().contains('4'));

        let e = Error::InvalidOffset { offset: 100, size: 8, len: 64 };
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("64"));
    }

    #[test]
    fn test_from_io_keeps_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err = Error::from_io(Path::new("a/b.bin"), io_err);
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err = Error::from_io(Path::new("a/b.bin"), io_err);
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}
