//! The per-connection endpoint of the engine transport.
//!
//! This is the "engine transport" the core spec (spec.md §6) treats as a
//! pre-established, byte-oriented, framed full-duplex channel with ordered
//! delivery and close notification. It is deliberately thin: HTTP
//! long-polling / WebSocket upgrade plumbing lives in [`crate::service`];
//! this module only owns the per-socket outbound queue, the `writable`
//! signal, and close notification.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::request::Parts;
use tokio::sync::{mpsc, Notify};

use crate::errors::Error;
use crate::sid::Sid;

/// One frame of the underlying transport: either a text frame (an encoded
/// socket.io packet) or a binary frame (a raw attachment payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// The engine.io wire-protocol revision negotiated at handshake time.
///
/// This gates the socket.io protocol revision one layer up
/// (`engineioxide::ProtocolVersion::V4` implies socket.io protocol v5, `V3`
/// implies socket.io protocol v4) exactly as the real negotiation works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V3,
    V4,
}

/// Why a socket was disconnected. Mirrors the reasons enumerated in
/// spec.md §7 plus the handshake-level failures specific to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client gracefully closed the connection.
    TransportClose,
    /// The client sent multiple polling requests concurrently, which the
    /// engine.io protocol forbids.
    MultipleHttpPollingError,
    /// The client sent a frame that could not be parsed.
    PacketParsingError,
    /// The underlying connection was closed abruptly (network failure).
    TransportError,
    /// The client did not send a pong within `ping_timeout`.
    HeartbeatTimeout,
    /// The server is shutting down.
    ClosingServer,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DisconnectReason::*;
        let s = match self {
            TransportClose => "client gracefully closed the connection",
            MultipleHttpPollingError => "client sent multiple polling requests at the same time",
            PacketParsingError => "client sent a bad request / the packet could not be parsed",
            TransportError => "the connection was abruptly closed",
            HeartbeatTimeout => "client did not send a pong in time",
            ClosingServer => "server is being closed",
        };
        f.write_str(s)
    }
}

/// A single engine.io connection. Generic over `D`, the opaque per-socket
/// scratch data the [`EngineIoHandler`](crate::handler::EngineIoHandler)
/// implementation wants to stash here (the core crate uses this for its
/// partial-binary-packet buffer).
pub struct Socket<D = ()> {
    pub id: Sid,
    pub protocol: ProtocolVersion,
    pub req_parts: Parts,
    /// Opaque per-socket user data.
    pub data: D,

    closed: AtomicBool,
    close_notify: Notify,
    tx: mpsc::Sender<Frame>,
}

impl<D> Socket<D> {
    pub(crate) fn new(
        id: Sid,
        protocol: ProtocolVersion,
        req_parts: Parts,
        data: D,
        tx: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            protocol,
            req_parts,
            data,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            tx,
        }
    }

    /// Sends a text frame (an encoded packet).
    pub fn emit(&self, msg: String) -> Result<(), Error> {
        self.write(Frame::Text(msg))
    }

    /// Sends a binary frame (an attachment payload).
    pub fn emit_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.write(Frame::Binary(data))
    }

    /// Writes one frame through the transport. Drops silently (per
    /// spec.md §4.5 `packet()`) only at the caller's discretion; here it
    /// surfaces errors so the caller (the core's `Client::packet`) can
    /// decide whether a given error is worth logging.
    pub fn write(&self, frame: Frame) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::SocketClosed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::InternalChannelFull,
            mpsc::error::TrySendError::Closed(_) => Error::SocketClosed,
        })
    }

    /// Whether a write right now would not block / not be dropped. Used to
    /// implement the `volatile` emission flag (spec.md §4.2, §4.3).
    pub fn writable(&self) -> bool {
        !self.is_closed() && self.tx.capacity() > 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tears down the socket and notifies anyone awaiting [`Self::closed`].
    pub fn close(&self, _reason: DisconnectReason) {
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    /// Resolves once the socket has been closed.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_notify.notified().await;
    }
}

impl<D: Default> Socket<D> {
    /// Builds a socket with no backing transport, for unit tests that only
    /// need to exercise core logic (matches the teacher's
    /// `Socket::new_dummy` referenced from `socketioxide`'s own tests).
    pub fn new_dummy(id: Sid, close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>) -> Self {
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let parts = http::Request::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let socket = Self::new(id, ProtocolVersion::V4, parts, D::default(), tx);
        // The close_fn hook exists for parity with the teacher's dummy
        // socket constructor; nothing here needs to invoke it eagerly.
        drop(close_fn);
        socket
    }
}

impl<D: fmt::Debug> fmt::Debug for Socket<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_fails_after_close() {
        let (tx, _rx) = mpsc::channel(4);
        let parts = http::Request::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let socket = Socket::new(Sid::new(), ProtocolVersion::V4, parts, (), tx);
        socket.close(DisconnectReason::TransportClose);
        assert!(matches!(
            socket.emit("hi".into()),
            Err(Error::SocketClosed)
        ));
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (tx, _rx) = mpsc::channel(4);
        let parts = http::Request::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let socket = Arc::new(Socket::new(Sid::new(), ProtocolVersion::V4, parts, (), tx));
        let s2 = socket.clone();
        let handle = tokio::spawn(async move {
            s2.closed().await;
        });
        socket.close(DisconnectReason::ClosingServer);
        handle.await.unwrap();
    }
}
