//! Call table for one connection.
//!
//! Every envelope in or out of a connection passes through the
//! [`Multiplexer`], which maps correlation ids to open calls, applies the
//! `more` flag closing rules and reports heartbeat expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zrpc_frame::{CorrelationId, Envelope, WireError};

use crate::config::ChannelConfig;
use crate::error::{ReplyError, RpcError};
use crate::heartbeat::HeartbeatMonitor;

/// Which side of the connection this multiplexer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// What a client call receives from the connection.
#[derive(Debug)]
pub(crate) enum Delivery {
    Envelope(Envelope),
    Failed(RpcError),
}

enum CallKind {
    Client { deliver: UnboundedSender<Delivery> },
    Server,
}

struct MuxState {
    calls: HashMap<CorrelationId, CallKind>,
    heartbeat: HeartbeatMonitor,
    next_id: u64,
    failure: Option<String>,
    shut_down: bool,
}

impl MuxState {
    fn allocate_id(&mut self) -> CorrelationId {
        loop {
            let id = CorrelationId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.calls.contains_key(&id) {
                return id;
            }
        }
    }

    fn remove(&mut self, id: CorrelationId) -> Option<CallKind> {
        self.heartbeat.forget(id);
        self.calls.remove(&id)
    }
}

struct Shared {
    state: Mutex<MuxState>,
    outbound: UnboundedSender<Envelope>,
    token: CancellationToken,
    config: ChannelConfig,
    role: Role,
}

/// Shared handle to a connection's call table.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl Multiplexer {
    /// Create a multiplexer and the queue its writer task drains.
    pub fn new(
        config: ChannelConfig,
        role: Role,
        token: CancellationToken,
    ) -> (Self, UnboundedReceiver<Envelope>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let state = MuxState {
            calls: HashMap::new(),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_timeout),
            next_id: 1,
            failure: None,
            shut_down: false,
        };
        let shared = Shared {
            state: Mutex::new(state),
            outbound,
            token,
            config,
            role,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            outbound_rx,
        )
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Token cancelled when the connection stops.
    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    fn state(&self) -> MutexGuard<'_, MuxState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a client call and queue its request.
    ///
    /// If the connection has already failed or was shut down, the returned
    /// receiver holds the terminal failure.
    pub(crate) fn open_call(
        &self,
        event: &str,
        args: Vec<Value>,
    ) -> (CorrelationId, UnboundedReceiver<Delivery>) {
        let (deliver, rx) = mpsc::unbounded_channel();
        let mut state = self.state();

        if state.shut_down {
            let _ = deliver.send(Delivery::Failed(RpcError::Closed));
            return (CorrelationId(0), rx);
        }
        if let Some(reason) = &state.failure {
            let _ = deliver.send(Delivery::Failed(RpcError::Connection(reason.clone())));
            return (CorrelationId(0), rx);
        }

        let id = state.allocate_id();
        if self
            .shared
            .outbound
            .send(Envelope::request(id, event, args))
            .is_err()
        {
            let _ = deliver.send(Delivery::Failed(RpcError::Connection(
                "connection writer stopped".to_string(),
            )));
            return (id, rx);
        }

        state.calls.insert(id, CallKind::Client { deliver });
        state.heartbeat.touch(id, Instant::now());
        debug!(%id, event, "opened call");
        (id, rx)
    }

    /// Forget a call locally. Frames arriving for it later are dropped.
    pub fn close_call(&self, id: CorrelationId) {
        if self.state().remove(id).is_some() {
            debug!(%id, "closed call locally");
        }
    }

    /// Terminate a client call locally with an error.
    pub(crate) fn reject_call(&self, id: CorrelationId, error: RpcError) {
        if let Some(CallKind::Client { deliver }) = self.state().remove(id) {
            let _ = deliver.send(Delivery::Failed(error));
        }
    }

    /// Queue a response envelope for an open server call.
    ///
    /// A terminal envelope closes the call; anything else refreshes its
    /// heartbeat.
    pub fn send_reply(&self, id: CorrelationId, envelope: Envelope) -> Result<(), ReplyError> {
        let mut state = self.state();
        if let Some(reason) = &state.failure {
            return Err(ReplyError::Disconnected(reason.clone()));
        }
        if state.shut_down {
            return Err(ReplyError::Disconnected("connection shut down".to_string()));
        }
        if !state.calls.contains_key(&id) {
            return Err(ReplyError::Closed(id));
        }

        if envelope.has_more() {
            state.heartbeat.touch(id, Instant::now());
        } else {
            state.remove(id);
        }

        self.shared
            .outbound
            .send(envelope)
            .map_err(|_| ReplyError::Disconnected("connection writer stopped".to_string()))
    }

    /// Send the empty terminal if the call is still open.
    pub fn finish_if_open(&self, id: CorrelationId) -> bool {
        self.send_reply(id, Envelope::terminal(id)).is_ok()
    }

    /// Send an error terminal if the call is still open.
    pub fn fail_if_open(&self, id: CorrelationId, error: &WireError) -> bool {
        self.send_reply(id, Envelope::error(id, error)).is_ok()
    }

    pub fn is_open(&self, id: CorrelationId) -> bool {
        self.state().calls.contains_key(&id)
    }

    /// Number of open calls.
    pub fn open_calls(&self) -> usize {
        self.state().calls.len()
    }

    /// Route an incoming envelope.
    ///
    /// Returns the envelope back when it opens a new server call and must
    /// go to the dispatcher.
    pub fn route(&self, envelope: Envelope) -> Option<Envelope> {
        let id = envelope.id;
        let mut guard = self.state();
        let state = &mut *guard;

        match state.calls.get(&id) {
            Some(CallKind::Client { deliver }) => {
                let terminal = !envelope.has_more()
                    || envelope.args.first().is_some_and(|error| !error.is_null());
                let delivered = deliver.send(Delivery::Envelope(envelope)).is_ok();
                if terminal || !delivered {
                    state.remove(id);
                } else {
                    state.heartbeat.touch(id, Instant::now());
                }
                None
            }
            Some(CallKind::Server) => {
                debug!(%id, "dropping duplicate request for open call");
                state.heartbeat.touch(id, Instant::now());
                None
            }
            None if self.shared.role == Role::Server
                && envelope.is_request()
                && !state.shut_down
                && state.failure.is_none() =>
            {
                state.calls.insert(id, CallKind::Server);
                state.heartbeat.touch(id, Instant::now());
                Some(envelope)
            }
            None => {
                debug!(%id, event = ?envelope.event, "dropping envelope for unknown call");
                None
            }
        }
    }

    /// Force-close every call whose heartbeat lapsed.
    pub fn expire(&self, now: Instant) {
        let mut state = self.state();
        let timeout = state.heartbeat.timeout();
        for id in state.heartbeat.expired(now) {
            match state.calls.remove(&id) {
                Some(CallKind::Client { deliver }) => {
                    debug!(%id, ?timeout, "call timed out");
                    let _ = deliver.send(Delivery::Failed(RpcError::TimeoutExpired(timeout)));
                }
                Some(CallKind::Server) => {
                    warn!(%id, ?timeout, "closing silent server call");
                }
                None => {}
            }
        }
    }

    /// Mark the connection as failed and terminate every open call.
    pub fn fail_all(&self, reason: &str) {
        let mut state = self.state();
        if state.failure.is_none() {
            state.failure = Some(reason.to_string());
        }
        for (_, call) in state.calls.drain() {
            if let CallKind::Client { deliver } = call {
                let _ = deliver.send(Delivery::Failed(RpcError::Connection(reason.to_string())));
            }
        }
        state.heartbeat.clear();
        drop(state);
        self.shared.token.cancel();
    }

    /// Drop every call without delivering anything and stop the connection.
    pub fn shutdown(&self) {
        let mut state = self.state();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.calls.clear();
        state.heartbeat.clear();
        drop(state);
        self.shared.token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}
