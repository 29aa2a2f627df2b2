use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use katana_transport::IpcStream;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::{RequestFrame, ResponseFrame};

const CHUNK: usize = 8 * 1024;

/// Blocking frame reader.
///
/// Bytes are buffered until a whole frame is available, so short reads
/// never surface to callers.
pub struct FrameReader<T> {
    stream: T,
    pending: BytesMut,
    max_payload: usize,
}

impl<T: Read> FrameReader<T> {
    pub fn new(stream: T) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    pub fn with_config(stream: T, config: FrameConfig) -> Self {
        Self {
            stream,
            pending: BytesMut::with_capacity(CHUNK),
            max_payload: config.max_payload_size,
        }
    }

    /// Next frame off the stream.
    ///
    /// End of stream, even in the middle of a frame, is reported as
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.pending, self.max_payload)? {
                trace!(request_id = frame.request_id, parts = frame.parts.len(), "frame read");
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Next frame, parsed as a framework request.
    pub fn read_request(&mut self) -> Result<RequestFrame> {
        RequestFrame::try_from(self.read_frame()?)
    }

    /// Next frame, parsed as a component response.
    pub fn read_response(&mut self) -> Result<ResponseFrame> {
        ResponseFrame::try_from(self.read_frame()?)
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl FrameReader<IpcStream> {
    /// Reader over a socket, with the read timeout from `config` applied.
    pub fn with_config_ipc(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        stream.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(stream, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use bytes::{BufMut, Bytes};

    use super::*;
    use crate::codec::{encode_frame, MAGIC};
    use crate::message::{ResponseMeta, SERVICE_CALL};
    use crate::writer::FrameWriter;

    fn request_bytes(request_id: u32, action: &str, command: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(request_id, &[action.as_bytes(), b"", command], &mut buf)
            .expect("frame should encode");
        buf.to_vec()
    }

    /// Hands out one byte per call and an `Interrupted` error before each.
    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
        interrupt: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(ErrorKind::Interrupted.into());
            }
            match self.bytes.get(self.pos) {
                Some(byte) if !buf.is_empty() => {
                    buf[0] = *byte;
                    self.pos += 1;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn reads_back_to_back_requests() {
        let mut bytes = request_bytes(1, "list", b"\x80");
        bytes.extend(request_bytes(2, "read", &[0xAB; 20 * 1024]));
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let first = reader.read_request().expect("first request should decode");
        assert_eq!((first.request_id, first.action.as_str()), (1, "list"));
        assert!(first.mappings.is_none());

        let second = reader.read_request().expect("second request should decode");
        assert_eq!(second.action, "read");
        assert_eq!(second.command.len(), 20 * 1024);

        assert!(matches!(
            reader.read_request(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn survives_short_and_interrupted_reads() {
        let mut reader = FrameReader::new(Trickle {
            bytes: request_bytes(7, "create", b"payload"),
            pos: 0,
            interrupt: false,
        });

        let request = reader.read_request().expect("request should decode");
        assert_eq!(request.request_id, 7);
        assert_eq!(request.command, Bytes::from_static(b"payload"));
    }

    #[test]
    fn truncated_frame_is_a_closed_connection() {
        let mut bytes = request_bytes(3, "list", b"command");
        bytes.truncate(bytes.len() - 2);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn rejects_garbage_and_oversized_frames() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8; crate::codec::HEADER_SIZE]));
        assert!(matches!(reader.read_frame(), Err(FrameError::InvalidMagic)));

        let mut header = BytesMut::new();
        header.put_slice(&MAGIC);
        header.put_u32_le(4096);
        header.put_u32_le(1);
        header.put_u16_le(3);
        let config = FrameConfig {
            max_payload_size: 64,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(header.to_vec()), config);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { size: 4096, max: 64 })
        ));
    }

    #[test]
    fn wrong_part_count_keeps_the_stream_usable() {
        let mut bytes = BytesMut::new();
        encode_frame(5, &[b"only-action"], &mut bytes).expect("frame should encode");
        bytes.extend_from_slice(&request_bytes(6, "list", b""));
        let mut reader = FrameReader::new(Cursor::new(bytes.to_vec()));

        assert!(matches!(
            reader.read_request(),
            Err(FrameError::MalformedParts { request_id: 5, .. })
        ));
        let next = reader.read_request().expect("next request should decode");
        assert_eq!(next.request_id, 6);
    }

    #[test]
    fn responses_cross_a_socket_pair() {
        let (left, right) = UnixStream::pair().expect("pair should be created");
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let sender = std::thread::spawn(move || {
            for request_id in 0..32u32 {
                let mut meta = ResponseMeta::empty();
                meta.insert(SERVICE_CALL);
                writer
                    .write_response(&ResponseFrame::new(request_id, meta, vec![0x90]))
                    .expect("response should be written");
            }
        });

        for expected in 0..32u32 {
            let response = reader.read_response().expect("response should decode");
            assert_eq!(response.request_id, expected);
            assert!(response.meta.contains(SERVICE_CALL));
        }
        sender.join().expect("writer thread should finish");
    }

    #[test]
    fn socket_read_timeout_is_applied() {
        let (left, _right) = UnixStream::pair().expect("pair should be created");
        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_ipc(IpcStream::from_unix(left), config)
            .expect("reader should be created");

        match reader.read_frame() {
            Err(FrameError::Io(err)) => {
                assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }
}
