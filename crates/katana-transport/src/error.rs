/// Socket-level failures of a component or a runtime caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind to {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Any other socket operation (timeouts, clone, shutdown).
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket name does not fit in `sockaddr_un`.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: String,
        len: usize,
        max: usize,
    },

    /// A `--socket`/`--tcp` value or gateway address that cannot be parsed.
    #[error("invalid endpoint: {0:?}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
