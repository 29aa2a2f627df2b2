use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// TCP listener for components started with a port instead of a socket.
pub struct TcpSocket {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `addr` (`host:port`).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening on tcp socket");
        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Connect to a listening TCP socket (blocking).
    pub fn connect(addr: &str) -> Result<IpcStream> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            endpoint: addr.to_string(),
            source: e,
        })?;
        debug!(addr, "connected to tcp socket");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Address the listener is bound to (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
