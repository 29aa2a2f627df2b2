use std::fmt;

use katana_frame::FrameError;
use katana_payload::{CodecError, PathError};
use katana_schema::SchemaError;
use katana_transport::TransportError;

/// Status reported for errors that do not carry their own.
pub const DEFAULT_ERROR_STATUS: &str = "500 Internal Server Error";

/// Errors raised by the SDK and by action handlers.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// A path operation on a payload document failed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// A payload could not be packed or unpacked.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A schema lookup failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Socket-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A local file was attached but the service has no file server.
    #[error("File server not configured: \"{service}\" ({version})")]
    NoFileServer { service: String, version: String },

    /// An argument given to the action API has the wrong shape or type.
    #[error("{0}")]
    InvalidArgument(String),

    /// A registered resource does not exist.
    #[error("Resource \"{0}\" not found")]
    ResourceNotFound(String),

    /// A runtime call could not be completed.
    #[error("runtime call failed: {0}")]
    Runtime(String),

    /// A handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// An error raised by user code, reported verbatim.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl SdkError {
    /// Shorthand for [`SdkError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        SdkError::InvalidArgument(message.into())
    }

    /// Message, code and status to report for this error.
    pub fn to_handler_error(&self) -> HandlerError {
        match self {
            SdkError::Handler(err) => err.clone(),
            other => HandlerError::new(other.to_string()),
        }
    }
}

/// An error raised by handler code, carrying the fields reported back to
/// the framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub message: String,
    pub code: i64,
    pub status: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 0,
            status: DEFAULT_ERROR_STATUS.to_string(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

pub type Result<T> = std::result::Result<T, SdkError>;
