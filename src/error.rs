/*!
 * Error types for the streaming engine
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::response_code::ResponseCode;

pub type Result<T> = std::result::Result<T, StreamerError>;

/// Internal error type carried through the engine.
///
/// Worker-side code propagates `StreamerError` with `?`; at the reporting
/// boundary (the completion queue and the C ABI) each error collapses to
/// its `ResponseCode`. The caller never observes anything richer than the
/// code, but the log lines do.
#[derive(Debug)]
pub enum StreamerError {
    /// Request arguments failed validation
    InvalidParameter(String),

    /// Request described no work at all
    EmptyRequest,

    /// A previous request's responses have not been drained yet
    Busy,

    /// The engine was asked to stop, or all responses were delivered
    Finished,

    /// Opening or reading a file or object failed
    FileAccess { path: PathBuf, source: Option<io::Error> },

    /// Fewer bytes were available than requested
    Eof { path: PathBuf, expected: u64, actual: u64 },

    /// The object storage backend is unavailable
    ObjectStorageUnsupported(String),

    /// Process fd limit cannot accommodate the configured concurrency
    InsufficientFdLimit { required: u64, available: u64 },

    /// Unclassified failure
    Other(String),
}

impl StreamerError {
    /// The caller-visible code this error collapses to.
    pub fn code(&self) -> ResponseCode {
        match self {
            StreamerError::InvalidParameter(_) => ResponseCode::InvalidParameterError,
            StreamerError::EmptyRequest => ResponseCode::EmptyRequestError,
            StreamerError::Busy => ResponseCode::BusyError,
            StreamerError::Finished => ResponseCode::FinishedError,
            StreamerError::FileAccess { .. } => ResponseCode::FileAccessError,
            StreamerError::Eof { .. } => ResponseCode::EofError,
            StreamerError::ObjectStorageUnsupported(_) => ResponseCode::S3NotSupported,
            StreamerError::InsufficientFdLimit { .. } => ResponseCode::InsufficientFdLimit,
            StreamerError::Other(_) => ResponseCode::UnknownError,
        }
    }

    /// A stop request is an orderly shutdown, not a failure worth an
    /// error-level log line.
    pub fn is_stop(&self) -> bool {
        matches!(self, StreamerError::Finished)
    }
}

impl fmt::Display for StreamerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamerError::InvalidParameter(msg) => {
                write!(f, "Invalid request parameters: {}", msg)
            }
            StreamerError::EmptyRequest => {
                write!(f, "Empty request - no response will be sent")
            }
            StreamerError::Busy => {
                write!(f, "Previous request is still running")
            }
            StreamerError::Finished => {
                write!(f, "Finished")
            }
            StreamerError::FileAccess { path, source } => match source {
                Some(err) => write!(f, "Failed to access {}: {}", path.display(), err),
                None => write!(f, "Failed to access {}", path.display()),
            },
            StreamerError::Eof { path, expected, actual } => {
                write!(
                    f,
                    "Read {} bytes from {}, expected {}",
                    actual,
                    path.display(),
                    expected
                )
            }
            StreamerError::ObjectStorageUnsupported(msg) => {
                write!(f, "Object storage not supported: {}", msg)
            }
            StreamerError::InsufficientFdLimit { required, available } => {
                write!(
                    f,
                    "Process fd limit {} is below the required {}",
                    available, required
                )
            }
            StreamerError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for StreamerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamerError::FileAccess { source: Some(err), .. } => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamerError {
    fn from(err: io::Error) -> Self {
        StreamerError::FileAccess {
            path: PathBuf::new(),
            source: Some(err),
        }
    }
}
