use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use katana_transport::IpcStream;
use tracing::trace;

use crate::codec::{body_size, encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::{RequestFrame, ResponseFrame};

/// Blocking frame writer.
///
/// Each frame is encoded into a reused buffer and written in full before
/// the call returns.
pub struct FrameWriter<T> {
    stream: T,
    scratch: BytesMut,
    max_payload: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(stream: T) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    pub fn with_config(stream: T, config: FrameConfig) -> Self {
        Self {
            stream,
            scratch: BytesMut::new(),
            max_payload: config.max_payload_size,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let parts: Vec<&[u8]> = frame.parts.iter().map(AsRef::as_ref).collect();
        self.send(frame.request_id, &parts)
    }

    /// Send a request built by the framework side (tests, runtime calls).
    pub fn write_request(&mut self, request: &RequestFrame) -> Result<()> {
        let mappings = request.mappings.as_deref().unwrap_or_default();
        self.send(
            request.request_id,
            &[request.action.as_bytes(), mappings, &request.command[..]],
        )
    }

    pub fn write_response(&mut self, response: &ResponseFrame) -> Result<()> {
        let meta = response.meta.to_bytes();
        self.send(response.request_id, &[&meta[..], &response.result[..]])
    }

    /// Encode `parts` under `request_id` and write them out.
    pub fn send(&mut self, request_id: u32, parts: &[&[u8]]) -> Result<()> {
        let size = body_size(parts.iter().map(|part| part.len()));
        if size > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload,
            });
        }

        self.scratch.clear();
        encode_frame(request_id, parts, &mut self.scratch)?;
        write_fully(&mut self.stream, &self.scratch)?;
        retry(|| self.stream.flush())?;
        trace!(request_id, parts = parts.len(), "frame written");
        Ok(())
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }
}

impl FrameWriter<IpcStream> {
    /// Writer over a socket, with the write timeout from `config` applied.
    pub fn with_config_ipc(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        stream.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(stream, config))
    }
}

fn write_fully<T: Write>(stream: &mut T, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match retry(|| stream.write(bytes))? {
            0 => return Err(FrameError::ConnectionClosed),
            n => bytes = &bytes[n..],
        }
    }
    Ok(())
}

// Interrupted and WouldBlock are retried; anything else is fatal.
fn retry<R>(mut op: impl FnMut() -> std::io::Result<R>) -> Result<R> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            Err(err) => return Err(err.into()),
        }
    }
}
