use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zrpc_transport::{Address, RpcListener};

use crate::connection::run_connection;
use crate::error::Result;
use crate::multiplexer::{Multiplexer, Role};
use crate::server::Server;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

impl Server {
    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Each connection gets its own call table; cancelling `shutdown` also
    /// stops every connection accepted here.
    pub async fn serve(&self, listener: RpcListener, shutdown: CancellationToken) -> Result<()> {
        info!(address = %listener.local_address(), "serving");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(stream) => {
                    let peer = stream.peer_description();
                    info!(peer = %peer, transport = stream.transport_name(), "accepted connection");
                    self.serve_connection(stream, peer, shutdown.child_token());
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        info!(address = %listener.local_address(), "stopped serving");
        Ok(())
    }

    /// Bind `address` and serve until `shutdown` is cancelled.
    pub async fn bind_and_serve(&self, address: &str, shutdown: CancellationToken) -> Result<()> {
        let address: Address = address.parse()?;
        let listener = RpcListener::bind(&address).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve calls on an already connected stream.
    pub fn serve_connection<T>(
        &self,
        io: T,
        peer: String,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mux, outbound) =
            Multiplexer::new(self.config().channel.clone(), Role::Server, shutdown);
        let server = self.clone();
        let dispatch_mux = mux.clone();
        tokio::spawn(async move {
            run_connection(io, peer.clone(), mux, outbound, move |request| {
                server.dispatch(&dispatch_mux, request);
            })
            .await;
            debug!(peer = %peer, "connection finished");
        })
    }
}
