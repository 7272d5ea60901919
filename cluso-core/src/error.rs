//! # Error Handling
//!
//! Error types shared by every Cluso storage component.
//!
//! Variants carry enough context (entity kind, ID, LSN, file) for the caller to act
//! on them. [`Error::kind`] folds the variants into the coarse taxonomy callers branch on:
//!
//! | Kind               | Meaning                                                    |
//! |--------------------|------------------------------------------------------------|
//! | `NotFound`         | key, node or edge absent; recoverable                      |
//! | `Corruption`       | checksum mismatch or malformed bytes; never masked         |
//! | `CapacityExceeded` | a bounded structure is full; normally handled internally   |
//! | `WriteConflict`    | a mutation references a stale or deleted entity            |
//! | `IoFailure`        | the operating system refused a read or write               |

use thiserror::Error;

use crate::value::ValueType;

/// Result type alias for Cluso operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Corruption,
    CapacityExceeded,
    WriteConflict,
    IoFailure,
    Other,
}

/// Primary error type for Cluso
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    // Integrity errors
    #[error("corruption in {context}: {details}")]
    Corruption { context: String, details: String },

    #[error("WAL checksum mismatch at LSN {lsn}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { lsn: u64, expected: u32, actual: u32 },

    // Capacity
    #[error("capacity exceeded: {resource}")]
    CapacityExceeded { resource: String },

    // Write-path conflicts
    #[error("write conflict: {message}")]
    WriteConflict { message: String },

    #[error("stale reference to deleted {entity} {id}")]
    StaleReference { entity: &'static str, id: u64 },

    #[error("no property index on {property:?}")]
    IndexNotFound { property: String },

    #[error("property {property:?} is indexed as {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("batch operation #{index} failed: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    // Component errors
    #[error("WAL error: {message}")]
    WriteAheadLog { message: String },

    #[error("SSTable error: {message}")]
    SSTable { message: String },

    #[error("MemTable error: {message}")]
    MemTable { message: String },

    #[error("Compaction failed: {reason}")]
    Compaction { reason: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // System errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("storage handle is closed")]
    Closed,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for a corruption error.
    pub fn corruption(context: impl Into<String>, details: impl Into<String>) -> Self {
        Error::Corruption {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Wrap an I/O error with a message naming what was being done.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }

    /// Map onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::IndexNotFound { .. } => ErrorKind::NotFound,
            Error::Corruption { .. } | Error::ChecksumMismatch { .. } => ErrorKind::Corruption,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::WriteConflict { .. } | Error::StaleReference { .. } => ErrorKind::WriteConflict,
            Error::BatchFailed { source, .. } => source.kind(),
            Error::Io { .. } => ErrorKind::IoFailure,
            Error::WriteAheadLog { .. }
            | Error::SSTable { .. }
            | Error::MemTable { .. }
            | Error::Compaction { .. }
            | Error::Serialization { .. }
            | Error::TypeMismatch { .. }
            | Error::InvalidArgument { .. }
            | Error::Configuration { .. }
            | Error::Closed
            | Error::Internal { .. } => ErrorKind::Other,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::CapacityExceeded | ErrorKind::WriteConflict => true,
            ErrorKind::Corruption | ErrorKind::IoFailure => false,
            ErrorKind::Other => !matches!(self, Error::Closed | Error::Configuration { .. }),
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Corruption { .. } => "CORRUPTION",
            Error::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Error::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Error::WriteConflict { .. } => "WRITE_CONFLICT",
            Error::StaleReference { .. } => "STALE_REFERENCE",
            Error::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            Error::TypeMismatch { .. } => "TYPE_MISMATCH",
            Error::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Error::BatchFailed { .. } => "BATCH_FAILED",
            Error::WriteAheadLog { .. } => "WAL_ERROR",
            Error::SSTable { .. } => "SSTABLE_ERROR",
            Error::MemTable { .. } => "MEMTABLE_ERROR",
            Error::Compaction { .. } => "COMPACTION_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Closed => "CLOSED",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            // Keep the classification intact for errors callers branch on.
            Error::Io { message, source } => Error::Io {
                message: format!("{}: {}", f(), message),
                source,
            },
            Error::Corruption { context, details } => Error::Corruption {
                context: format!("{}: {}", f(), context),
                details,
            },
            other @ (Error::NotFound { .. }
            | Error::IndexNotFound { .. }
            | Error::TypeMismatch { .. }
            | Error::ChecksumMismatch { .. }
            | Error::StaleReference { .. }
            | Error::BatchFailed { .. }
            | Error::WriteConflict { .. }
            | Error::CapacityExceeded { .. }
            | Error::Closed) => other,
            other => Error::Internal {
                message: format!("{}: {}", f(), other),
            },
        })
    }
}
