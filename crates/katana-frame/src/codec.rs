use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: magic (2) + length (4) + request id (4) + part count (2) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Magic bytes: "KT" (0x4B 0x54).
pub const MAGIC: [u8; 2] = [0x4B, 0x54];

/// Default maximum body size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Maximum number of parts in one frame.
pub const MAX_PARTS: usize = 16;

/// Per-part length prefix.
const PART_PREFIX: usize = 4;

/// A multipart message tagged with its request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlates a response with the request that produced it.
    pub request_id: u32,
    /// The message parts, in wire order.
    pub parts: Vec<Bytes>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(request_id: u32, parts: Vec<Bytes>) -> Self {
        Self { request_id, parts }
    }

    /// Size of the frame body (part prefixes + part bytes).
    pub fn body_size(&self) -> usize {
        body_size(self.parts.iter().map(|p| p.len()))
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body_size()
    }
}

pub(crate) fn body_size(lens: impl Iterator<Item = usize>) -> usize {
    lens.map(|len| PART_PREFIX + len).sum()
}

/// Encode a multipart frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────┬────────────┬──────────┬──────────────────────────┐
/// │ Magic (2B)│ Length   │ Request id │ Parts    │ Body                     │
/// │ 0x4B 0x54 │ (4B LE)  │ (4B LE)    │ (2B LE)  │ [len (4B LE) | bytes]... │
/// └───────────┴──────────┴────────────┴──────────┴──────────────────────────┘
/// ```
pub fn encode_frame(request_id: u32, parts: &[&[u8]], dst: &mut BytesMut) -> Result<()> {
    if parts.len() > MAX_PARTS {
        return Err(FrameError::TooManyParts {
            count: parts.len(),
            max: MAX_PARTS,
        });
    }
    let body = body_size(parts.iter().map(|p| p.len()));
    if body > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(HEADER_SIZE + body);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body as u32);
    dst.put_u32_le(request_id);
    dst.put_u16_le(parts.len() as u16);
    for part in parts {
        dst.put_u32_le(part.len() as u32);
        dst.put_slice(part);
    }
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. A frame whose body
/// disagrees with its part table is consumed as well and reported as
/// [`FrameError::MalformedParts`].
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let mut header = &src[2..HEADER_SIZE];
    let body_len = header.get_u32_le() as usize;
    let request_id = header.get_u32_le();
    let part_count = header.get_u16_le() as usize;

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }
    if part_count > MAX_PARTS {
        return Err(FrameError::TooManyParts {
            count: part_count,
            max: MAX_PARTS,
        });
    }

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let mut body = src.split_to(body_len).freeze();
    let mut parts = Vec::with_capacity(part_count);

    for index in 0..part_count {
        if body.len() < PART_PREFIX {
            return Err(malformed(request_id, format!("part {index} length truncated")));
        }
        let len = body.get_u32_le() as usize;
        if body.len() < len {
            return Err(malformed(
                request_id,
                format!("part {index} declares {len} bytes, {} remain", body.len()),
            ));
        }
        parts.push(body.split_to(len));
    }

    if !body.is_empty() {
        return Err(malformed(
            request_id,
            format!("{} trailing bytes after {part_count} parts", body.len()),
        ));
    }

    Ok(Some(Frame { request_id, parts }))
}

fn malformed(request_id: u32, reason: String) -> FrameError {
    FrameError::MalformedParts { request_id, reason }
}

/// Limits and socket timeouts shared by [`FrameReader`](crate::FrameReader)
/// and [`FrameWriter`](crate::FrameWriter).
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted body, in bytes.
    pub max_payload_size: usize,
    /// `None` blocks forever.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
