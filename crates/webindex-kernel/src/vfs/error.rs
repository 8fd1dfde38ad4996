//! VFS error types.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// VFS error type.
///
/// Every variant is request-scoped: none of them touch the shared
/// [`MountTable`](super::MountTable).
#[derive(Debug, Error)]
pub enum VfsError {
    /// Unknown mount, missing path, or a path that leaves its mount root.
    ///
    /// The three causes are deliberately indistinguishable from outside.
    #[error("not found: {0}")]
    NotFound(String),

    /// Directory-only operation on a file, or the reverse.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The directory walk ran past its ceiling. Nothing was sent.
    #[error("directory walk exceeded {0:?}")]
    TimeoutExceeded(Duration),

    /// A read failed after the response started. The transfer must be aborted.
    #[error("streaming I/O failure on {path}: {source}")]
    StreamingIoFailure {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The consumer went away; production stopped at a checkpoint.
    #[error("cancelled")]
    Cancelled,

    /// Mount could not be constructed.
    #[error("invalid mount: {0}")]
    InvalidMount(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a transport should surface an error to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
    /// "Not found" response.
    NotFound,
    /// "Forbidden" response.
    Forbidden,
    /// Generic server error; no bytes were sent yet.
    ServerError,
    /// Bytes may already be on the wire: drop the connection.
    Abort,
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an InvalidOperation error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an InvalidMount error.
    pub fn invalid_mount(msg: impl Into<String>) -> Self {
        Self::InvalidMount(msg.into())
    }

    /// Create a StreamingIoFailure error.
    pub fn streaming(path: impl Into<String>, source: io::Error) -> Self {
        Self::StreamingIoFailure {
            path: path.into(),
            source,
        }
    }

    /// Map this error onto the signal a transport should send.
    pub fn client_signal(&self) -> ClientSignal {
        match self {
            VfsError::NotFound(_) => ClientSignal::NotFound,
            VfsError::InvalidOperation(_) => ClientSignal::Forbidden,
            VfsError::TimeoutExceeded(_)
            | VfsError::StreamingIoFailure { .. }
            | VfsError::Cancelled => ClientSignal::Abort,
            VfsError::InvalidMount(_) | VfsError::Io(_) => ClientSignal::ServerError,
        }
    }

    /// True when a well-formed error response can still be sent.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.client_signal(), ClientSignal::Abort)
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::InvalidOperation(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::TimeoutExceeded(limit) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("directory walk exceeded {limit:?}"),
            ),
            VfsError::StreamingIoFailure { source, .. } => source,
            VfsError::Cancelled => io::Error::new(io::ErrorKind::BrokenPipe, "cancelled"),
            VfsError::InvalidMount(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Io(e) => e,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
