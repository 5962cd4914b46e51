//! Core-layer configuration: how long a transport has to send its first
//! CONNECT, how long a broadcast-with-ack waits by default, and the path
//! the socket.io handshake is served under (spec.md §6 "Configuration").

use std::time::Duration;

/// Configuration for the socket.io core layer (`SocketIo`/`Client`), as
/// distinct from [`engineioxide::EngineIoConfig`], which governs the
/// transport underneath it.
#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    /// Path the socket.io handshake is served under. Defaults to
    /// `/socket.io`, forwarded to [`engineioxide::EngineIoConfig::req_path`]
    /// by [`crate::SocketIoBuilder`].
    pub req_path: String,
    /// How long a (protocol v5) transport may stay open without a CONNECT
    /// packet for any namespace before it is closed (spec.md §7 item 8).
    pub connect_timeout: Duration,
    /// Default timeout for [`crate::operators::Operators::emit_with_ack`]
    /// and [`crate::socket::Socket::emit_with_ack`] when no per-call
    /// `.timeout()` is set.
    pub ack_timeout: Duration,
    /// Upper bound on buffered-but-unsent frames per socket, forwarded to
    /// [`engineioxide::EngineIoConfig::max_buffer_size`].
    pub max_buffer_size: usize,
}

impl Default for SocketIoConfig {
    fn default() -> Self {
        Self {
            req_path: "/socket.io".to_string(),
            connect_timeout: Duration::from_secs(45),
            ack_timeout: Duration::from_secs(5),
            max_buffer_size: 128,
        }
    }
}

impl SocketIoConfig {
    pub fn builder() -> SocketIoConfigBuilder {
        SocketIoConfigBuilder::new()
    }
}

/// Builder for [`SocketIoConfig`].
#[derive(Debug, Clone)]
pub struct SocketIoConfigBuilder {
    config: SocketIoConfig,
}

impl SocketIoConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SocketIoConfig::default(),
        }
    }

    pub fn req_path(mut self, path: impl Into<String>) -> Self {
        self.config.req_path = path.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    pub fn build(self) -> SocketIoConfig {
        self.config
    }
}

impl Default for SocketIoConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
