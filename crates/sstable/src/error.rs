//! Error type shared by every layer of the table reader.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the table reader.
///
/// The type is `Clone` so that iterators can keep the first error they hit
/// as their status and hand out copies of it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Structurally malformed input: bad magic, undecodable handle,
    /// checksum mismatch, truncated block.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The footer carries a version this reader does not understand. The
    /// file was most likely written by a newer format.
    #[error("unknown footer version {0}; the file may have been written by a newer format")]
    UnknownVersion(u32),

    /// Read failure from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The operation would have needed blocking I/O under a cache-only read.
    #[error("incomplete: {0}")]
    Incomplete(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }

    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// The status reported when a cache-only read misses.
    pub(crate) fn no_io() -> Self {
        Error::Incomplete("no blocking io".to_string())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// Result alias for table reader operations.
pub type Result<T> = std::result::Result<T, Error>;
