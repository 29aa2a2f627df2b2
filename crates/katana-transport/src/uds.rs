use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Mode applied to socket files right after binding.
pub const SOCKET_MODE: u32 = 0o600;

// `sockaddr_un.sun_path` capacity, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

enum Binding {
    /// Socket file plus the `(dev, inode)` it had when created.
    File { path: PathBuf, identity: (u64, u64) },
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    Abstract(String),
}

/// Unix domain socket a component accepts framework connections on.
///
/// A socket file is removed again on drop, unless something else has
/// replaced it in the meantime.
pub struct UnixDomainSocket {
    listener: UnixListener,
    binding: Binding,
}

impl UnixDomainSocket {
    /// Listen on a socket file.
    ///
    /// A leftover socket at `path` from an earlier run is replaced. Any
    /// other kind of file makes the bind fail.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let label = path.display().to_string();
        check_len(&label, path.as_os_str().len())?;
        let bind_err = |source: std::io::Error| TransportError::Bind {
            endpoint: label.clone(),
            source,
        };

        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(?path, "replacing stale component socket");
                std::fs::remove_file(path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(bind_err)?;
        let meta = std::fs::symlink_metadata(path).map_err(bind_err)?;
        info!(?path, "component socket ready");

        Ok(Self {
            listener,
            binding: Binding::File {
                path: path.to_path_buf(),
                identity: (meta.dev(), meta.ino()),
            },
        })
    }

    /// Listen on a Linux abstract namespace name (without the `@`).
    #[cfg(target_os = "linux")]
    pub fn bind_abstract(name: &str) -> Result<Self> {
        let label = format!("@{name}");
        // One byte of `sun_path` holds the leading NUL.
        check_len(&label, name.len() + 1)?;
        let addr = abstract_addr(name).map_err(|source| TransportError::Bind {
            endpoint: label.clone(),
            source,
        })?;
        let listener = UnixListener::bind_addr(&addr).map_err(|source| TransportError::Bind {
            endpoint: label.clone(),
            source,
        })?;
        info!(name = %label, "component socket ready");

        Ok(Self {
            listener,
            binding: Binding::Abstract(name.to_string()),
        })
    }

    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(endpoint = %self.endpoint(), "framework connected");
        Ok(IpcStream::from_unix(stream))
    }

    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        UnixStream::connect(path)
            .map(IpcStream::from_unix)
            .map_err(|source| TransportError::Connect {
                endpoint: path.display().to_string(),
                source,
            })
    }

    #[cfg(target_os = "linux")]
    pub fn connect_abstract(name: &str) -> Result<IpcStream> {
        abstract_addr(name)
            .and_then(|addr| UnixStream::connect_addr(&addr))
            .map(IpcStream::from_unix)
            .map_err(|source| TransportError::Connect {
                endpoint: format!("@{name}"),
                source,
            })
    }

    /// Where clients reach this socket.
    pub fn endpoint(&self) -> Endpoint {
        match &self.binding {
            Binding::File { path, .. } => Endpoint::Unix(path.clone()),
            Binding::Abstract(name) => Endpoint::Abstract(name.clone()),
        }
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Binding::File { path, identity } = &self.binding else {
            return;
        };
        let Ok(meta) = std::fs::symlink_metadata(path) else {
            return;
        };
        if meta.file_type().is_socket() && (meta.dev(), meta.ino()) == *identity {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(?path, error = %err, "failed to remove component socket");
            }
        } else {
            debug!(?path, "socket path was replaced; leaving it");
        }
    }
}

fn check_len(label: &str, len: usize) -> Result<()> {
    if len >= SUN_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: label.to_string(),
            len,
            max: SUN_PATH_LEN - 1,
        });
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> std::io::Result<std::os::unix::net::SocketAddr> {
    use std::os::linux::net::SocketAddrExt;

    std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("katana-uds-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
        dir
    }

    fn exchange(socket: &UnixDomainSocket, client: impl FnOnce() -> IpcStream + Send + 'static) {
        let peer = std::thread::spawn(move || {
            client()
                .write_all(b"ping")
                .expect("client should write");
        });
        let mut server = socket.accept().expect("connection should be accepted");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).expect("server should read");
        assert_eq!(&buf, b"ping");
        peer.join().expect("client thread should finish");
    }

    #[test]
    fn socket_file_lifecycle() {
        let dir = scratch_dir("lifecycle");
        let path = dir.join("users.sock");

        let socket = UnixDomainSocket::bind(&path).expect("socket should bind");
        assert_eq!(socket.endpoint(), Endpoint::Unix(path.clone()));
        let mode = std::fs::metadata(&path)
            .expect("socket file should exist")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, SOCKET_MODE);

        let target = path.clone();
        exchange(&socket, move || {
            UnixDomainSocket::connect(&target).expect("client should connect")
        });

        drop(socket);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_socket_is_replaced_but_files_are_not() {
        let dir = scratch_dir("stale");
        let stale = dir.join("stale.sock");
        drop(UnixListener::bind(&stale).expect("stale socket should bind"));
        let socket = UnixDomainSocket::bind(&stale).expect("stale socket should be replaced");
        drop(socket);

        let regular = dir.join("regular.sock");
        std::fs::write(&regular, b"data").expect("file should be written");
        assert!(matches!(
            UnixDomainSocket::bind(&regular),
            Err(TransportError::Bind { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_leaves_replaced_path_alone() {
        let dir = scratch_dir("replaced");
        let path = dir.join("users.sock");

        let socket = UnixDomainSocket::bind(&path).expect("socket should bind");
        std::fs::remove_file(&path).expect("socket file should be removable");
        std::fs::write(&path, b"someone else").expect("file should be written");
        drop(socket);

        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn long_paths_are_rejected() {
        let path = format!("/tmp/{}.sock", "k".repeat(SUN_PATH_LEN));
        assert!(matches!(
            UnixDomainSocket::bind(&path),
            Err(TransportError::PathTooLong { max, .. }) if max == SUN_PATH_LEN - 1
        ));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn abstract_socket_exchange() {
        let name = format!("katana-uds-test-{}", std::process::id());
        let socket = UnixDomainSocket::bind_abstract(&name).expect("abstract socket should bind");
        assert_eq!(socket.endpoint(), Endpoint::Abstract(name.clone()));

        exchange(&socket, move || {
            UnixDomainSocket::connect_abstract(&name).expect("client should connect")
        });
    }
}
