//! Per-call liveness tracking.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use zrpc_frame::CorrelationId;

/// Tracks the last time traffic was seen for each open call.
///
/// Calls are tracked independently: concurrent calls on one connection
/// can have very different traffic patterns.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_seen: HashMap<CorrelationId, Instant>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: HashMap::new(),
        }
    }

    /// The configured liveness timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record traffic for a call, starting to track it if needed.
    pub fn touch(&mut self, id: CorrelationId, now: Instant) {
        self.last_seen.insert(id, now);
    }

    /// Stop tracking a call. Returns whether it was tracked.
    pub fn forget(&mut self, id: CorrelationId) -> bool {
        self.last_seen.remove(&id).is_some()
    }

    /// Remove and return every call silent for longer than the timeout.
    ///
    /// Each call is reported at most once.
    pub fn expired(&mut self, now: Instant) -> Vec<CorrelationId> {
        let timeout = self.timeout;
        let mut expired: Vec<CorrelationId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        for id in &expired {
            self.last_seen.remove(id);
        }
        expired
    }

    /// Number of calls being tracked.
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}
