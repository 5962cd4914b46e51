//! Engine.IO transport configuration.

use std::time::Duration;

/// The transport kinds a client may use to reach this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Polling,
    Websocket,
}

/// Configuration of the engine.io transport layer.
///
/// Built with [`EngineIoConfig::builder`]; mirrors the knobs the socket.io
/// back-compat `set(key, val)` API (spec.md §6) forwards down to the
/// transport: `heartbeat timeout` → [`Self::ping_timeout`], `heartbeat
/// interval` → [`Self::ping_interval`], `destroy buffer size` →
/// [`Self::max_payload`], `transports` → [`Self::transports`].
#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    /// Path the transport is mounted under. Defaults to `/engine.io`.
    pub req_path: String,
    /// Interval between server-initiated pings.
    pub ping_interval: Duration,
    /// How long the server waits for a pong before closing with
    /// [`crate::socket::DisconnectReason::HeartbeatTimeout`].
    pub ping_timeout: Duration,
    /// Maximum payload size accepted from a client, in bytes.
    pub max_payload: u64,
    /// Transports this engine will accept, in preference order.
    pub transports: Vec<TransportType>,
    /// Bound on the outbound per-socket frame queue; once full, writes fail
    /// with [`crate::errors::Error::InternalChannelFull`] instead of
    /// growing unbounded.
    pub max_buffer_size: usize,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            req_path: "/engine.io".to_string(),
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            max_payload: 1e6 as u64,
            transports: vec![TransportType::Polling, TransportType::Websocket],
            max_buffer_size: 128,
        }
    }
}

impl EngineIoConfig {
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::new()
    }
}

/// Builder for [`EngineIoConfig`].
#[derive(Debug, Clone)]
pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineIoConfig::default(),
        }
    }

    pub fn req_path(mut self, path: impl Into<String>) -> Self {
        self.config.req_path = path.into();
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.config.max_payload = max_payload;
        self
    }

    pub fn transports(mut self, transports: Vec<TransportType>) -> Self {
        self.config.transports = transports;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}

impl Default for EngineIoConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
