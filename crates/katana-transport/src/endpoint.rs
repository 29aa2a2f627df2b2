use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

pub const IPC_SCHEME: &str = "ipc://";
pub const TCP_SCHEME: &str = "tcp://";

/// Prefix shared by every generated component socket name.
const NAME_PREFIX: &str = "katana";

/// Address a component listens on, or a runtime caller connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Filesystem Unix domain socket.
    Unix(PathBuf),
    /// Linux abstract namespace socket, stored without the leading `@`.
    Abstract(String),
    /// TCP `host:port`.
    Tcp(String),
}

impl Endpoint {
    /// Local TCP endpoint on the given port.
    pub fn tcp_port(port: u16) -> Self {
        Endpoint::Tcp(format!("127.0.0.1:{port}"))
    }

    /// Default socket for a component, derived from its kind, name and version.
    ///
    /// Linux uses the abstract namespace; other platforms fall back to a
    /// socket file in the temp directory.
    pub fn for_component(kind: &str, name: &str, version: &str) -> Self {
        named_socket(&ipc_name(&[kind, name, version]))
    }

    /// True for TCP endpoints.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Endpoint::Tcp(_))
    }
}

/// Build a socket name from free-form parts.
///
/// Every run of non-alphanumeric characters becomes a single `-`, so
/// `["service", "users", "1.0"]` gives `katana-service-users-1-0`.
pub fn ipc_name(parts: &[&str]) -> String {
    let mut name = String::from(NAME_PREFIX);
    for part in parts {
        name.push('-');
        let mut last_dash = true;
        for ch in part.chars() {
            if ch.is_ascii_alphanumeric() {
                name.push(ch);
                last_dash = false;
            } else if !last_dash {
                name.push('-');
                last_dash = true;
            }
        }
        if name.ends_with('-') && name.len() > NAME_PREFIX.len() + 1 {
            name.pop();
        }
    }
    name
}

#[cfg(target_os = "linux")]
fn named_socket(name: &str) -> Endpoint {
    Endpoint::Abstract(name.to_string())
}

#[cfg(not(target_os = "linux"))]
fn named_socket(name: &str) -> Endpoint {
    Endpoint::Unix(std::env::temp_dir().join(format!("{name}.sock")))
}

fn looks_like_tcp(value: &str) -> bool {
    if value.contains('/') {
        return false;
    }
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if let Some(rest) = value.strip_prefix(TCP_SCHEME) {
            if looks_like_tcp(rest) {
                return Ok(Endpoint::Tcp(rest.to_string()));
            }
            return Err(TransportError::InvalidEndpoint(value.to_string()));
        }

        let rest = value.strip_prefix(IPC_SCHEME).unwrap_or(value);
        if rest.is_empty() {
            return Err(TransportError::InvalidEndpoint(value.to_string()));
        }
        if let Some(name) = rest.strip_prefix('@') {
            if name.is_empty() {
                return Err(TransportError::InvalidEndpoint(value.to_string()));
            }
            return Ok(named_socket(name));
        }
        if !value.starts_with(IPC_SCHEME) && looks_like_tcp(rest) {
            return Ok(Endpoint::Tcp(rest.to_string()));
        }
        Ok(Endpoint::Unix(PathBuf::from(rest)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{IPC_SCHEME}{}", path.display()),
            Endpoint::Abstract(name) => write!(f, "{IPC_SCHEME}@{name}"),
            Endpoint::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_name_replaces_symbols() {
        assert_eq!(
            ipc_name(&["service", "users", "1.0.0"]),
            "katana-service-users-1-0-0"
        );
        assert_eq!(
            ipc_name(&["middleware", "auth  gate", "2.*"]),
            "katana-middleware-auth-gate-2"
        );
    }

    #[test]
    fn parses_tcp_endpoints() {
        let ep: Endpoint = "tcp://127.0.0.1:5010".parse().unwrap();
        assert_eq!(ep, Endpoint::Tcp("127.0.0.1:5010".to_string()));

        let bare: Endpoint = "localhost:7000".parse().unwrap();
        assert!(bare.is_tcp());
        assert_eq!(bare.to_string(), "tcp://localhost:7000");
    }

    #[test]
    fn parses_unix_endpoints() {
        let ep: Endpoint = "ipc:///tmp/users.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::Unix(PathBuf::from("/tmp/users.sock")));

        let bare: Endpoint = "/run/katana/users.sock".parse().unwrap();
        assert_eq!(bare, Endpoint::Unix(PathBuf::from("/run/katana/users.sock")));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn parses_abstract_names() {
        let ep: Endpoint = "ipc://@katana-service-users-1-0".parse().unwrap();
        assert_eq!(ep, Endpoint::Abstract("katana-service-users-1-0".to_string()));
        assert_eq!(ep.to_string(), "ipc://@katana-service-users-1-0");
        assert_eq!(
            Endpoint::for_component("service", "users", "1.0"),
            Endpoint::Abstract("katana-service-users-1-0".to_string())
        );
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(matches!(
            "".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "tcp://no-port".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "ipc://@".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
