//! Error types for the datafile engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in datafile, logfile and recovery operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The datafile has no room left for the marker; rotate to a new one.
    #[error("datafile full")]
    DatafileFull,

    /// No datafile could ever hold a marker of this size.
    #[error("document too large: {size} bytes, maximal datafile size is {maximal_size}")]
    DocumentTooLarge {
        /// Aligned marker size that was requested.
        size: u32,
        /// The largest datafile size available.
        maximal_size: u32,
    },

    /// The requested datafile size cannot hold a header and a footer.
    #[error("maximal size {requested} is too small, need at least {minimum}")]
    MaximalSizeTooSmall {
        /// Size that was requested.
        requested: u64,
        /// Minimum acceptable size.
        minimum: u64,
    },

    /// A write was attempted on a datafile in READ state.
    #[error("datafile is read-only")]
    ReadOnly,

    /// The operation is not allowed in the current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the violation.
        message: String,
    },

    /// The datafile already carries a footer.
    #[error("datafile already sealed")]
    DatafileSealed,

    /// The filesystem ran out of space.
    #[error("filesystem full")]
    FilesystemFull,

    /// Any other operating system error.
    #[error("system error: {0}")]
    System(#[source] io::Error),

    /// A file with the target name already exists.
    #[error("datafile already exists: {}", path.display())]
    DatafileAlreadyExists {
        /// Path that already exists.
        path: PathBuf,
    },

    /// The file is too short or cannot be read.
    #[error("datafile unreadable: {}: {message}", path.display())]
    DatafileUnreadable {
        /// Path of the file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// The file contains no data.
    #[error("datafile empty: {}", path.display())]
    DatafileEmpty {
        /// Path of the file.
        path: PathBuf,
    },

    /// Structural or checksum validation failed.
    #[error("corrupted datafile {} at position {position}: {message}", path.display())]
    CorruptedDatafile {
        /// Path of the file, empty for anonymous datafiles.
        path: PathBuf,
        /// Byte offset of the offending marker.
        position: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Replaying the write-ahead log failed.
    #[error("recovery failed: {message}")]
    Recovery {
        /// Description of the failure.
        message: String,
    },

    /// Another process holds the directory lock.
    #[error("directory is locked by another process: {}", path.display())]
    DirectoryLocked {
        /// Locked directory.
        path: PathBuf,
    },

    /// A document payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The platform does not support the operation.
    #[error("unsupported: {operation}")]
    Unsupported {
        /// What was attempted.
        operation: String,
    },
}

/// Raw OS error number for "no space left on device".
const ENOSPC: i32 = 28;

impl CoreError {
    /// Classifies an I/O error, mapping "no space left" to [`CoreError::FilesystemFull`].
    #[must_use]
    pub fn from_io(error: io::Error) -> Self {
        if error.raw_os_error() == Some(ENOSPC) || error.kind() == io::ErrorKind::StorageFull {
            Self::FilesystemFull
        } else {
            Self::System(error)
        }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(path: impl Into<PathBuf>, position: u64, message: impl Into<String>) -> Self {
        Self::CorruptedDatafile {
            path: path.into(),
            position,
            message: message.into(),
        }
    }

    /// Creates a recovery error.
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }

    /// Returns the stable numeric error code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::System(_) => 2,
            Self::Unsupported { .. } => 9,
            Self::Codec { .. } => 600,
            Self::IllegalState { .. } => 1000,
            Self::DatafileSealed => 1002,
            Self::ReadOnly => 1004,
            Self::DatafileUnreadable { .. } => 1006,
            Self::DatafileEmpty { .. } => 1007,
            Self::Recovery { .. } => 1008,
            Self::CorruptedDatafile { .. } => 1100,
            Self::FilesystemFull => 1104,
            Self::DatafileAlreadyExists { .. } => 1106,
            Self::DirectoryLocked { .. } => 1107,
            Self::MaximalSizeTooSmall { .. } => 1206,
            Self::DocumentTooLarge { .. } => 1216,
            Self::DatafileFull => 1300,
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(error: io::Error) -> Self {
        Self::from_io(error)
    }
}

impl From<mmfiles_storage::StorageError> for CoreError {
    fn from(error: mmfiles_storage::StorageError) -> Self {
        use mmfiles_storage::StorageError;
        match error {
            StorageError::Io(e) => Self::from_io(e),
            StorageError::AlreadyExists { path } => Self::DatafileAlreadyExists { path },
            StorageError::ReadOnly => Self::ReadOnly,
            StorageError::Unsupported(what) => Self::Unsupported {
                operation: what.to_string(),
            },
            other @ (StorageError::OutOfBounds { .. } | StorageError::Unmapped) => {
                Self::illegal_state(other.to_string())
            }
        }
    }
}
