//! Client connection and per-call result streams.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use futures_core::Stream;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zrpc_frame::{CorrelationId, WireError};
use zrpc_transport::Address;

use crate::builtin::{ProcedureInfo, INSPECT_METHOD, PING_METHOD};
use crate::config::ClientConfig;
use crate::connection::run_connection;
use crate::error::{PeerError, Result, RpcError};
use crate::multiplexer::{Delivery, Multiplexer, Role};

/// One item of a call's result stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub value: Value,
    /// `false` on the terminal reply.
    pub more: bool,
}

/// A connection to a zrpc server.
///
/// Calls made before the connection is established are queued; if it
/// cannot be established they all fail with [`RpcError::Connection`].
/// Dropping the client closes it.
pub struct Client {
    mux: Multiplexer,
    address: Address,
}

impl Client {
    /// Start connecting to `address` in the background.
    ///
    /// Only an unparsable address or a missing Tokio runtime fail here.
    pub fn connect(address: &str, config: ClientConfig) -> Result<Self> {
        let address: Address = address.parse()?;
        let runtime = Handle::try_current().map_err(|err| PeerError::NoRuntime(err.to_string()))?;

        let (mux, outbound) =
            Multiplexer::new(config.channel.clone(), Role::Client, CancellationToken::new());
        let driver = mux.clone();
        let target = address.clone();
        let connect_timeout = config.connect_timeout;

        runtime.spawn(async move {
            let token = driver.token();
            let attempt = tokio::time::timeout(connect_timeout, zrpc_transport::connect(&target));
            let connected = tokio::select! {
                _ = token.cancelled() => return,
                connected = attempt => connected,
            };

            match connected {
                Ok(Ok(stream)) => {
                    let peer = stream.peer_description();
                    info!(address = %target, peer = %peer, "connected");
                    run_connection(stream, peer, driver, outbound, |request| {
                        debug!(id = %request.id, "ignoring request sent to client");
                    })
                    .await;
                }
                Ok(Err(err)) => {
                    warn!(address = %target, error = %err, "connect failed");
                    driver.fail_all(&err.to_string());
                }
                Err(_) => {
                    warn!(address = %target, timeout = ?connect_timeout, "connect timed out");
                    driver.fail_all(&format!(
                        "connect to {target} timed out after {connect_timeout:?}"
                    ));
                }
            }
        });

        Ok(Self { mux, address })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Start a call and return its result stream.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> CallStream {
        let (id, rx) = self.mux.open_call(method, args);
        CallStream {
            id,
            rx,
            mux: self.mux.clone(),
            done: false,
        }
    }

    /// Run a call to completion and return its terminal value.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> std::result::Result<Value, RpcError> {
        self.invoke(method, args).last().await
    }

    /// Fetch the server's procedure descriptions.
    pub async fn inspect(
        &self,
    ) -> std::result::Result<BTreeMap<String, ProcedureInfo>, RpcError> {
        let value = self.call(INSPECT_METHOD, Vec::new()).await?;
        serde_json::from_value(value).map_err(|err| {
            RpcError::Remote(WireError::named("InvalidReply", err.to_string()))
        })
    }

    /// Round-trip a ping through the server.
    pub async fn ping(&self) -> std::result::Result<Duration, RpcError> {
        let started = Instant::now();
        self.call(PING_METHOD, Vec::new()).await?;
        Ok(started.elapsed())
    }

    /// Close every call and the connection. Safe to call more than once.
    pub fn close(&self) {
        if !self.mux.is_shut_down() {
            debug!(address = %self.address, "closing client");
        }
        self.mux.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.mux.is_shut_down()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.mux.shutdown();
    }
}

/// Result stream of one call.
///
/// Yields intermediate replies with `more == true`, then exactly one
/// terminal item (`Ok` with `more == false`, or `Err`), then `None`.
/// Dropping the stream closes the call locally.
pub struct CallStream {
    id: CorrelationId,
    rx: UnboundedReceiver<Delivery>,
    mux: Multiplexer,
    done: bool,
}

impl CallStream {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Next reply, or `None` once the call is over.
    pub async fn recv(&mut self) -> Option<std::result::Result<Reply, RpcError>> {
        std::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Drain the call and return its terminal value.
    pub async fn last(mut self) -> std::result::Result<Value, RpcError> {
        while let Some(item) = self.recv().await {
            let reply = item?;
            if !reply.more {
                return Ok(reply.value);
            }
        }
        Err(RpcError::Closed)
    }

    /// Stop receiving replies for this call. No message is sent to the server.
    pub fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.mux.close_call(self.id);
            self.rx.close();
        }
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<std::result::Result<Reply, RpcError>>> {
        if self.done {
            return Poll::Ready(None);
        }
        let item = match ready!(self.rx.poll_recv(cx)) {
            None => {
                self.done = true;
                return Poll::Ready(None);
            }
            Some(Delivery::Failed(err)) => Err(err),
            // Replies still buffered when the client closed are discarded.
            Some(Delivery::Envelope(_)) if self.mux.is_shut_down() => {
                self.done = true;
                return Poll::Ready(None);
            }
            Some(Delivery::Envelope(envelope)) => {
                let more = envelope.has_more();
                match envelope.into_response() {
                    (Some(error), _) => Err(RpcError::Remote(error)),
                    (None, value) => Ok(Reply { value, more }),
                }
            }
        };

        if !matches!(item, Ok(Reply { more: true, .. })) {
            self.done = true;
        }
        Poll::Ready(Some(item))
    }
}

impl Stream for CallStream {
    type Item = std::result::Result<Reply, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_item(cx)
    }
}

impl Drop for CallStream {
    fn drop(&mut self) {
        if !self.done {
            self.mux.close_call(self.id);
        }
    }
}

impl std::fmt::Debug for CallStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStream")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
