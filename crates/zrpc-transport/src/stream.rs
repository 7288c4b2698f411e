use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::address::Address;
use crate::error::{Result, TransportError};

/// A connected transport stream implementing `AsyncRead + AsyncWrite`.
///
/// This is the fundamental I/O type returned by [`connect`] and
/// [`RpcListener::accept`](crate::RpcListener::accept).
pub struct RpcStream {
    inner: RpcStreamInner,
}

enum RpcStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl RpcStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        // Envelopes are small and latency-sensitive.
        let _ = stream.set_nodelay(true);
        Self {
            inner: RpcStreamInner::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: RpcStreamInner::Unix(stream),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            RpcStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            RpcStreamInner::Unix(_) => "unix-domain-socket",
        }
    }

    /// Remote peer description for logging.
    pub fn peer_description(&self) -> String {
        match &self.inner {
            RpcStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:unknown".to_string()),
            #[cfg(unix)]
            RpcStreamInner::Unix(_) => "unix:local".to_string(),
        }
    }
}

/// Connect to a listening endpoint.
pub async fn connect(address: &Address) -> Result<RpcStream> {
    match address {
        Address::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|source| TransportError::Connect {
                    address: address.to_string(),
                    source,
                })?;
            debug!(%address, "connected over tcp");
            Ok(RpcStream::from_tcp(stream))
        }
        #[cfg(unix)]
        Address::Ipc(path) => {
            let stream = tokio::net::UnixStream::connect(path).await.map_err(|source| {
                TransportError::Connect {
                    address: address.to_string(),
                    source,
                }
            })?;
            debug!(%address, "connected to unix domain socket");
            Ok(RpcStream::from_unix(stream))
        }
        #[cfg(not(unix))]
        Address::Ipc(_) => Err(TransportError::UnsupportedScheme("ipc".to_string())),
    }
}

impl AsyncRead for RpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RpcStreamInner::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            RpcStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            RpcStreamInner::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            RpcStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RpcStreamInner::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            RpcStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RpcStreamInner::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            RpcStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for RpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
