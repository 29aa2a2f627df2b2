//! Multipart framing between the framework and a component.
//!
//! Every message is framed with:
//! - A 2-byte magic number ("KT") for stream synchronization
//! - A 4-byte little-endian body length
//! - A 4-byte little-endian request id, echoed back on the response
//! - A 2-byte little-endian part count
//!
//! The body is a sequence of length-prefixed parts. Requests carry
//! `action`, `mappings` and `command`; responses carry `meta` and `result`.
//! Request ids let many requests share one socket and complete out of order.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_PARTS,
};
pub use error::{FrameError, Result};
pub use message::{
    RequestFrame, ResponseFrame, ResponseMeta, DOWNLOAD, EMPTY_META, FILES, SERVICE_CALL,
    TRANSACTIONS,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;
