//! Socket transport for KATANA SDK components.
//!
//! A component listens on a single socket for the framework's requests:
//! - Unix domain sockets (filesystem paths, or abstract names on Linux)
//! - TCP on a local port
//!
//! This is the lowest layer of the SDK. Everything else builds on top of
//! the [`IpcStream`] and [`Listener`] types provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{ipc_name, Endpoint};
pub use error::{Result, TransportError};
pub use listener::{connect, wake, Listener};
pub use tcp::TcpSocket;
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
