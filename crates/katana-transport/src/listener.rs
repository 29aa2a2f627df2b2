use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::tcp::TcpSocket;
use crate::traits::IpcStream;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// The socket a component serves on, whichever kind `--socket`/`--tcp`
/// asked for.
pub enum Listener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpSocket),
}

impl Listener {
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => UnixDomainSocket::bind(path).map(Self::Unix),
            #[cfg(target_os = "linux")]
            Endpoint::Abstract(name) => UnixDomainSocket::bind_abstract(name).map(Self::Unix),
            Endpoint::Tcp(addr) => TcpSocket::bind(addr).map(Self::Tcp),
            #[allow(unreachable_patterns)]
            other => Err(TransportError::InvalidEndpoint(other.to_string())),
        }
    }

    pub fn accept(&self) -> Result<IpcStream> {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept(),
            Self::Tcp(socket) => socket.accept(),
        }
    }

    /// Address to connect to. A TCP bind on port 0 reports the real port.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => socket.endpoint(),
            Self::Tcp(socket) => Endpoint::Tcp(socket.local_addr().to_string()),
        }
    }
}

pub fn connect(endpoint: &Endpoint) -> Result<IpcStream> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => UnixDomainSocket::connect(path),
        #[cfg(target_os = "linux")]
        Endpoint::Abstract(name) => UnixDomainSocket::connect_abstract(name),
        Endpoint::Tcp(addr) => TcpSocket::connect(addr),
        #[allow(unreachable_patterns)]
        other => Err(TransportError::InvalidEndpoint(other.to_string())),
    }
}

/// Release a thread blocked in [`Listener::accept`] on `endpoint` by
/// opening and closing one connection.
pub fn wake(endpoint: &Endpoint) {
    match connect(endpoint) {
        Ok(stream) => {
            let _ = stream.shutdown();
        }
        Err(err) => debug!(%endpoint, error = %err, "wake-up connection failed"),
    }
}
