//! Calls, streams and dispatch on top of zrpc envelopes.
//!
//! This is the "just works" layer. A [`Server`] answers calls from a
//! procedure table; a [`Client`] opens calls and reads their replies as a
//! stream. Many calls share one connection, keyed by correlation id.

pub mod builtin;
pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod heartbeat;
mod listener;
pub mod multiplexer;
pub mod reply;
pub mod server;

pub use builtin::{ArgInfo, ProcedureInfo, INSPECT_METHOD, PING_METHOD};
pub use client::{CallStream, Client, Reply};
pub use config::{ChannelConfig, ClientConfig, ServerConfig};
pub use connection::PAYLOAD_TOO_LARGE;
pub use error::{
    BoxError, PeerError, ReplyError, Result, RpcError, HANDLER_PANICKED, INVALID_ARGUMENTS,
    METHOD_NOT_FOUND, TIMEOUT_EXPIRED,
};
pub use heartbeat::HeartbeatMonitor;
pub use multiplexer::{Multiplexer, Role};
pub use reply::ReplySink;
pub use server::{arg, HandlerFuture, HandlerResult, Procedure, Server, ServerBuilder};

/// Cancellation handle accepted by [`Server::serve`].
pub use tokio_util::sync::CancellationToken;
