use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Scheme prefix for TCP endpoints.
pub const TCP_SCHEME: &str = "tcp://";
/// Scheme prefix for Unix domain socket endpoints.
pub const IPC_SCHEME: &str = "ipc://";

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// `tcp://host:port`. IPv6 hosts are stored without brackets.
    Tcp { host: String, port: u16 },
    /// `ipc:///path/to/socket`.
    Ipc(PathBuf),
}

impl Address {
    /// Parse an address string.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| TransportError::InvalidAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = input.strip_prefix(TCP_SCHEME) {
            let (host, port) = split_host_port(rest).ok_or_else(|| invalid("expected host:port"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }

        if let Some(rest) = input.strip_prefix(IPC_SCHEME) {
            if rest.is_empty() {
                return Err(invalid("empty socket path"));
            }
            return Ok(Self::Ipc(PathBuf::from(rest)));
        }

        Err(invalid("unknown scheme (expected tcp:// or ipc://)"))
    }

    /// Convenience constructor for a TCP address.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Convenience constructor for a Unix domain socket address.
    pub fn ipc(path: impl AsRef<Path>) -> Self {
        Self::Ipc(path.as_ref().to_path_buf())
    }

    /// Scheme name for diagnostics.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Ipc(_) => "ipc",
        }
    }
}

fn split_host_port(rest: &str) -> Option<(&str, &str)> {
    if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    rest.rsplit_once(':')
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(f, "{TCP_SCHEME}[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(f, "{TCP_SCHEME}{host}:{port}"),
            Self::Ipc(path) => write!(f, "{IPC_SCHEME}{}", path.display()),
        }
    }
}
