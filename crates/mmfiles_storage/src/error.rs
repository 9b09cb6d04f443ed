//! Error types for mapped-region operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while creating, mapping or flushing a region.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A range access fell outside the mapped region.
    #[error("range out of bounds: offset {offset}, len {len}, region size {size}")]
    OutOfBounds {
        /// Requested start offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Length of the region.
        size: usize,
    },

    /// A write was attempted through a read-only mapping.
    #[error("region is mapped read-only")]
    ReadOnly,

    /// The file to be created already exists.
    #[error("file already exists: {}", path.display())]
    AlreadyExists {
        /// Path of the existing file.
        path: PathBuf,
    },

    /// The region lost its mapping after a failed protection change.
    #[error("region is not mapped")]
    Unmapped,

    /// The platform does not support the requested kind of mapping.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

impl StorageError {
    /// Returns the underlying I/O error, if any.
    #[must_use]
    pub fn as_io(&self) -> Option<&io::Error> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
