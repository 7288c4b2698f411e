use std::time::Duration;

use zrpc_frame::DEFAULT_MAX_PAYLOAD;

/// Per-connection protocol settings shared by clients and servers.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// A call with no traffic for longer than this is force-closed.
    pub heartbeat_timeout: Duration,
    /// How often open calls are checked against the timeout.
    pub heartbeat_tick: Duration,
    /// Maximum envelope payload size in bytes.
    pub max_payload_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_tick: Duration::from_secs(1),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ChannelConfig {
    /// Defaults with a custom heartbeat timeout; the tick scales with it.
    pub fn with_heartbeat(timeout: Duration) -> Self {
        Self {
            heartbeat_timeout: timeout,
            heartbeat_tick: (timeout / 10).clamp(Duration::from_millis(1), Duration::from_secs(1)),
            ..Self::default()
        }
    }
}

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the transport connection.
    pub connect_timeout: Duration,
    /// Protocol settings.
    pub channel: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            channel: ChannelConfig::default(),
        }
    }
}

/// Server settings applied to every accepted connection.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub channel: ChannelConfig,
}
