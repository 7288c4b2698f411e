#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::address::Address;
use crate::error::{Result, TransportError};
use crate::stream::RpcStream;

/// A bound endpoint accepting [`RpcStream`] connections.
///
/// Unix domain socket listeners remove their socket file on drop, but only
/// if the path still refers to the socket they created.
pub struct RpcListener {
    inner: ListenerInner,
    address: Address,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketListener),
}

impl RpcListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on an address.
    ///
    /// For `tcp://` addresses with port 0 the OS picks a port; use
    /// [`local_address`](Self::local_address) to learn it.
    pub async fn bind(address: &Address) -> Result<Self> {
        match address {
            Address::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .await
                    .map_err(|source| TransportError::Bind {
                        address: address.to_string(),
                        source,
                    })?;
                let local = listener.local_addr()?;
                let bound = Address::tcp(local.ip().to_string(), local.port());
                info!(address = %bound, "listening on tcp");
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                    address: bound,
                })
            }
            #[cfg(unix)]
            Address::Ipc(path) => {
                let listener = UnixSocketListener::bind(path, Self::DEFAULT_SOCKET_MODE)?;
                Ok(Self {
                    inner: ListenerInner::Unix(listener),
                    address: address.clone(),
                })
            }
            #[cfg(not(unix))]
            Address::Ipc(_) => Err(TransportError::UnsupportedScheme("ipc".to_string())),
        }
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<RpcStream> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!(%peer, "accepted tcp connection");
                Ok(RpcStream::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerInner::Unix(listener) => {
                let (stream, _addr) = listener
                    .listener
                    .accept()
                    .await
                    .map_err(TransportError::Accept)?;
                debug!("accepted unix connection");
                Ok(RpcStream::from_unix(stream))
            }
        }
    }

    /// The address this listener is bound to (with the resolved TCP port).
    pub fn local_address(&self) -> &Address {
        &self.address
    }
}

#[cfg(unix)]
struct UnixSocketListener {
    listener: tokio::net::UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

#[cfg(unix)]
impl UnixSocketListener {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    fn bind(path: &Path, mode: u32) -> Result<Self> {
        let path = path.to_path_buf();
        let bind_err = |source: std::io::Error| TransportError::Bind {
            address: Address::Ipc(path.clone()).to_string(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            } else {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = tokio::net::UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((created.dev(), created.ino())),
            path,
        })
    }
}

#[cfg(unix)]
impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}
