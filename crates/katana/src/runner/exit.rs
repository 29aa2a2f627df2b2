//! Process exit codes for component binaries.
//!
//! Codes above 1 follow the BSD `sysexits.h` values so supervisors can
//! tell a bad command line from a socket that could not be bound.

use std::fmt;
use std::io;

use katana_frame::FrameError;
use katana_sdk::SdkError;
use katana_transport::TransportError;

pub const SUCCESS: i32 = 0;
/// The action ran but replied with an error.
pub const FAILURE: i32 = 1;
pub const USAGE: i32 = 64;
pub const DATA_INVALID: i32 = 65;
/// The socket could not be bound or reached.
pub const UNAVAILABLE: i32 = 69;
pub const INTERNAL: i32 = 70;
pub const IO_ERROR: i32 = 74;
pub const PERMISSION_DENIED: i32 = 77;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `"{context}: {err}"` under `code`.
    pub fn context(code: i32, context: &str, err: impl fmt::Display) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound => UNAVAILABLE,
        _ => IO_ERROR,
    }
}

fn transport_code(err: &TransportError) -> i32 {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_code(source),
        TransportError::InvalidEndpoint(_) | TransportError::PathTooLong { .. } => USAGE,
    }
}

fn sdk_code(err: &SdkError) -> i32 {
    match err {
        SdkError::Transport(err) => transport_code(err),
        SdkError::Frame(FrameError::Io(source)) => io_code(source),
        SdkError::Frame(_) | SdkError::Codec(_) | SdkError::Path(_) | SdkError::Schema(_) => {
            DATA_INVALID
        }
        SdkError::Panic(_) => INTERNAL,
        _ => FAILURE,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::context(io_code(&err), context, err)
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::context(transport_code(&err), context, err)
}

pub fn sdk_error(context: &str, err: SdkError) -> CliError {
    CliError::context(sdk_code(&err), context, err)
}
