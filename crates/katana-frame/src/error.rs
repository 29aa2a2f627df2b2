use katana_transport::TransportError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4B54 \"KT\")")]
    InvalidMagic,

    /// The frame body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame declares more parts than allowed.
    #[error("too many frame parts ({count}, max {max})")]
    TooManyParts { count: usize, max: usize },

    /// The frame body does not match its declared parts.
    ///
    /// The frame bytes are consumed, so the stream stays in sync and the
    /// caller can answer `request_id` with an error.
    #[error("malformed frame {request_id}: {reason}")]
    MalformedParts { request_id: u32, reason: String },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(io) | TransportError::Accept(io) => Self::Io(io),
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
                Self::Io(source)
            }
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}
