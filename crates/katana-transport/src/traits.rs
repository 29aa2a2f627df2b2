use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::Result;

/// Connected byte stream between the framework and a component.
///
/// The frame layer and the dispatcher only see this type, whichever
/// socket kind the component was started on.
pub struct IpcStream {
    socket: Socket,
}

enum Socket {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

// Run the same expression against whichever socket is inside.
macro_rules! on_socket {
    ($socket:expr, $s:ident => $body:expr) => {
        match $socket {
            #[cfg(unix)]
            Socket::Unix($s) => $body,
            Socket::Tcp($s) => $body,
        }
    };
}

impl IpcStream {
    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> Self {
        Self {
            socket: Socket::Unix(stream),
        }
    }

    /// Wrap a TCP stream with Nagle disabled, since frames are small.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            socket: Socket::Tcp(stream),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(on_socket!(&self.socket, s => s.set_read_timeout(timeout))?)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(on_socket!(&self.socket, s => s.set_write_timeout(timeout))?)
    }

    /// Second handle on the same socket, for a dedicated reader thread.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(match &self.socket {
            #[cfg(unix)]
            Socket::Unix(s) => Self::from_unix(s.try_clone()?),
            Socket::Tcp(s) => Self::from_tcp(s.try_clone()?),
        })
    }

    /// Close both directions. Readers blocked on a clone see end of stream.
    pub fn shutdown(&self) -> Result<()> {
        match on_socket!(&self.socket, s => s.shutdown(Shutdown::Both)) {
            Err(err) if err.kind() != ErrorKind::NotConnected => Err(err.into()),
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.socket {
            #[cfg(unix)]
            Socket::Unix(_) => "unix",
            Socket::Tcp(_) => "tcp",
        }
    }

    /// Process id of the connected peer, from `SO_PEERCRED`.
    ///
    /// Only Unix sockets on Linux report one.
    #[cfg(target_os = "linux")]
    pub fn peer_pid(&self) -> Option<u32> {
        use std::os::fd::AsRawFd;

        let Socket::Unix(stream) = &self.socket else {
            return None;
        };
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` point to writable memory of the sizes
        // passed in, and the descriptor stays open for the whole call.
        let rc = unsafe {
            libc::getsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast::<libc::c_void>(),
                &mut len,
            )
        };
        (rc == 0 && cred.pid > 0).then_some(cred.pid as u32)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn peer_pid(&self) -> Option<u32> {
        None
    }
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        on_socket!(&mut self.socket, s => s.read(buf))
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        on_socket!(&mut self.socket, s => s.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        on_socket!(&mut self.socket, s => s.flush())
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IpcStream").field(&self.kind()).finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn pair() -> (IpcStream, IpcStream) {
        let (left, right) = UnixStream::pair().expect("pair should be created");
        (IpcStream::from_unix(left), IpcStream::from_unix(right))
    }

    #[test]
    fn clone_shares_the_socket() {
        let (left, mut right) = pair();
        let mut writer = left.try_clone().expect("stream should clone");
        assert_eq!(format!("{left:?}"), "IpcStream(\"unix\")");

        writer.write_all(b"frame").expect("clone should write");
        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).expect("peer should read");
        assert_eq!(&buf, b"frame");
    }

    #[test]
    fn shutdown_wakes_a_blocked_reader() {
        let (stream, _peer) = pair();
        let mut reader = stream.try_clone().expect("stream should clone");
        let blocked = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).expect("read should end cleanly")
        });

        stream.shutdown().expect("shutdown should succeed");
        stream.shutdown().expect("second shutdown should be harmless");
        assert_eq!(blocked.join().expect("reader should finish"), 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn peer_pid_is_this_process() {
        let (stream, _peer) = pair();
        assert_eq!(stream.peer_pid(), Some(std::process::id()));
    }
}
