//! Socket transport for zrpc.
//!
//! Connections are addressed with URI-like strings:
//! - `tcp://host:port` for TCP
//! - `ipc:///path/to/socket` for Unix domain sockets (Linux/macOS)
//!
//! This is the lowest layer of zrpc. Everything else builds on top of
//! the [`RpcStream`] and [`RpcListener`] types provided here.

pub mod address;
pub mod error;
pub mod listener;
pub mod stream;

pub use address::Address;
pub use error::{Result, TransportError};
pub use listener::RpcListener;
pub use stream::{connect, RpcStream};
