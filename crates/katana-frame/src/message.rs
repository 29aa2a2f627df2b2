//! Request and response frame layouts, plus response metadata flags.
//!
//! Response metadata lets a proxy route a reply without decoding the
//! payload: it is either a single [`EMPTY_META`] byte, or one byte per
//! flag that applies.

use bytes::Bytes;

use crate::codec::Frame;
use crate::error::{FrameError, Result};

/// No flag applies.
pub const EMPTY_META: u8 = 0x00;

/// The transport registers calls to other services.
pub const SERVICE_CALL: u8 = 0x01;

/// At least one registered call carries files.
pub const FILES: u8 = 0x02;

/// The transport registers transactions.
pub const TRANSACTIONS: u8 = 0x03;

/// The transport carries a file download.
pub const DOWNLOAD: u8 = 0x04;

/// Ordered set of response metadata flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    flags: Vec<u8>,
}

impl ResponseMeta {
    /// Metadata with no flags.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a flag once, keeping insertion order.
    pub fn insert(&mut self, flag: u8) {
        if flag != EMPTY_META && !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flags in insertion order.
    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    /// Wire form: the flags, or a single zero byte when there are none.
    pub fn to_bytes(&self) -> Bytes {
        if self.flags.is_empty() {
            Bytes::from_static(&[EMPTY_META])
        } else {
            Bytes::copy_from_slice(&self.flags)
        }
    }

    /// Parse the wire form. Zero bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut meta = Self::empty();
        for flag in bytes {
            meta.insert(*flag);
        }
        meta
    }
}

/// An inbound request: `action`, optional `mappings`, `command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub request_id: u32,
    pub action: String,
    /// Encoded schema mappings, sent only when the schema changed.
    pub mappings: Option<Bytes>,
    pub command: Bytes,
}

impl RequestFrame {
    pub fn new(request_id: u32, action: impl Into<String>, command: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            action: action.into(),
            mappings: None,
            command: command.into(),
        }
    }

    pub fn with_mappings(mut self, mappings: impl Into<Bytes>) -> Self {
        self.mappings = Some(mappings.into());
        self
    }

    pub fn into_frame(self) -> Frame {
        let mappings = self.mappings.unwrap_or_default();
        Frame::new(
            self.request_id,
            vec![Bytes::from(self.action.into_bytes()), mappings, self.command],
        )
    }
}

impl TryFrom<Frame> for RequestFrame {
    type Error = FrameError;

    fn try_from(frame: Frame) -> Result<Self> {
        let request_id = frame.request_id;
        let [action, mappings, command]: [Bytes; 3] =
            frame.parts.try_into().map_err(|parts: Vec<Bytes>| {
                FrameError::MalformedParts {
                    request_id,
                    reason: format!("request needs 3 parts, got {}", parts.len()),
                }
            })?;

        let action = String::from_utf8(action.to_vec()).map_err(|_| FrameError::MalformedParts {
            request_id,
            reason: "action name is not valid UTF-8".to_string(),
        })?;

        Ok(Self {
            request_id,
            action,
            mappings: (!mappings.is_empty()).then_some(mappings),
            command,
        })
    }
}

/// An outbound response: `meta` flags and the encoded `result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub request_id: u32,
    pub meta: ResponseMeta,
    pub result: Bytes,
}

impl ResponseFrame {
    pub fn new(request_id: u32, meta: ResponseMeta, result: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            meta,
            result: result.into(),
        }
    }

    pub fn into_frame(self) -> Frame {
        Frame::new(self.request_id, vec![self.meta.to_bytes(), self.result])
    }
}

impl TryFrom<Frame> for ResponseFrame {
    type Error = FrameError;

    fn try_from(frame: Frame) -> Result<Self> {
        let request_id = frame.request_id;
        let [meta, result]: [Bytes; 2] = frame.parts.try_into().map_err(|parts: Vec<Bytes>| {
            FrameError::MalformedParts {
                request_id,
                reason: format!("response needs 2 parts, got {}", parts.len()),
            }
        })?;

        Ok(Self {
            request_id,
            meta: ResponseMeta::from_bytes(&meta),
            result,
        })
    }
}
