//! Typed errors for every fallible operation this crate exposes
//! (spec.md §7 "Error and edge-case behaviors").

use crate::packet::PacketDecodeError;

/// The crate-wide error type. Most public methods that can fail return
/// this; acknowledgement waits use [`crate::ack::AckError`] instead since
/// a timed-out or dropped ack isn't really a *send* failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the socket is closed")]
    SocketGone,
    #[error(transparent)]
    Engine(#[from] engineioxide::Error),
    #[error("malformed packet: {0}")]
    PacketDecode(#[from] PacketDecodeError),
    #[error("failed to (de)serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("namespace {0:?} does not exist")]
    UnknownNamespace(String),
    #[error("a connect middleware rejected the client: {0}")]
    MiddlewareRejected(String),
    /// An ack callback was requested on a chain that selects more than
    /// one socket (spec.md §7 item 4 "Misuse").
    #[error("Callbacks are not supported when broadcasting")]
    CallbackWithBroadcast,
}

/// Failure modes specific to tearing a namespace's adapter down or
/// fanning out a forced disconnect (spec.md §7 item 7 "forced close").
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Send(#[from] Error),
}

/// Why a socket was dropped server-side mid-disconnect, surfaced to
/// `Client::onclose`/`Namespace::close` fan-out.
#[derive(Debug, thiserror::Error)]
pub enum DisconnectError {
    #[error(transparent)]
    Send(#[from] Error),
}

impl Error {
    /// The message to embed in a CONNECT_ERROR packet when this error
    /// aborted admission. A middleware's own message is sent verbatim
    /// rather than wrapped in this type's `Display` text (spec.md §7
    /// item 3: the packet carries `err.data ?? err.message`, not a
    /// description of what rejected it).
    pub(crate) fn connect_error_message(&self) -> String {
        match self {
            Error::MiddlewareRejected(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub use crate::ack::AckError;
