//! Streaming RPC over TCP and Unix sockets.
//!
//! A client invokes a named procedure on a server and receives zero or more
//! intermediate replies followed by one terminal reply. Many calls share one
//! connection and are told apart by correlation id.
//!
//! # Crate Structure
//!
//! - [`transport`]: `tcp://` and `ipc://` addresses, listeners and streams
//! - [`frame`]: envelope format and the length-prefixed wire codec
//! - [`peer`]: call multiplexing, server dispatch and the client (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use zrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use zrpc_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use zrpc_peer::*;
}

#[cfg(feature = "peer")]
pub use zrpc_peer::{Client, ReplySink, RpcError, Server};
