use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use zrpc_frame::{CorrelationId, Envelope};

use crate::error::{to_wire_error, BoxError, ReplyError};
use crate::multiplexer::Multiplexer;

/// Handle a procedure uses to answer its call.
///
/// Cloneable so deferred work can keep streaming after the handler
/// returns. When the last clone is dropped with the call still open, the
/// call is closed with an empty terminal reply.
#[derive(Clone)]
pub struct ReplySink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    id: CorrelationId,
    mux: Multiplexer,
    replied: AtomicBool,
}

impl ReplySink {
    pub(crate) fn new(id: CorrelationId, mux: Multiplexer) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                id,
                mux,
                replied: AtomicBool::new(false),
            }),
        }
    }

    /// Correlation id of the call being answered.
    pub fn id(&self) -> CorrelationId {
        self.inner.id
    }

    /// Stream an intermediate value; more replies follow.
    pub fn send(&self, value: impl Into<Value>) -> Result<(), ReplyError> {
        self.reply(value, true)
    }

    /// Send a value with an explicit `more` flag.
    pub fn reply(&self, value: impl Into<Value>, more: bool) -> Result<(), ReplyError> {
        let id = self.inner.id;
        self.inner
            .mux
            .send_reply(id, Envelope::reply(id, value.into(), more))?;
        self.inner.replied.store(true, Ordering::Release);
        Ok(())
    }

    /// Send the final value and close the call.
    pub fn finish(&self, value: impl Into<Value>) -> Result<(), ReplyError> {
        self.reply(value, false)
    }

    /// Close the call with an error. The message is sent verbatim.
    pub fn fail(&self, error: impl Into<BoxError>) -> Result<(), ReplyError> {
        let id = self.inner.id;
        let error = to_wire_error(error.into());
        self.inner.mux.send_reply(id, Envelope::error(id, &error))?;
        self.inner.replied.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the call no longer accepts replies.
    pub fn is_closed(&self) -> bool {
        !self.inner.mux.is_open(self.inner.id)
    }

    pub(crate) fn has_replied(&self) -> bool {
        self.inner.replied.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySink")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        if self.mux.finish_if_open(self.id) {
            debug!(id = %self.id, "closed call after last reply handle was dropped");
        }
    }
}
