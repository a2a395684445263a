use std::path::PathBuf;
use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Error type for storage, namespace and evaluation operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// An archive list or creation parameter was rejected at create time.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A write fell outside the retention of every archive.
    #[error("Timestamp {timestamp} not covered by any archive (now={now})")]
    TimestampNotCovered { timestamp: u64, now: u64 },

    #[error("Invalid time interval: from={from} until={until}")]
    InvalidTimeInterval { from: i64, until: i64 },

    /// Header or archive-info table could not be decoded.
    #[error("Corrupt file {path:?}: {details}")]
    CorruptFile { path: PathBuf, details: String },

    #[error("Invalid aggregation method: {0}")]
    InvalidAggregationMethod(String),

    #[error("Unknown function: {0}")]
    InvalidFunctionName(String),

    /// A function received arguments of the wrong type or cardinality.
    #[error("Argument error: {0}")]
    ArgumentShape(String),

    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("Archive configurations of {from:?} and {to:?} are unalike")]
    IncompatibleArchives { from: PathBuf, to: PathBuf },

    /// Every sub-source of a multi-source read failed.
    #[error("All sub-fetches failed: {}", .0.join("; "))]
    AllSourcesFailed(Vec<String>),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// True for errors caused by the request itself (malformed interval, name or
    /// arguments) rather than by the storage layer.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StrataError::InvalidConfiguration(_)
                | StrataError::TimestampNotCovered { .. }
                | StrataError::InvalidTimeInterval { .. }
                | StrataError::InvalidAggregationMethod(_)
                | StrataError::InvalidFunctionName(_)
                | StrataError::ArgumentShape(_)
                | StrataError::Parse { .. }
                | StrataError::FileExists(_)
                | StrataError::IncompatibleArchives { .. }
        )
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for StrataError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StrataError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
