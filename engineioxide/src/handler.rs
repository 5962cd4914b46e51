//! The callback surface a consumer of the engine transport implements.

use std::sync::Arc;

use crate::socket::{DisconnectReason, Socket};

/// Notified of the lifecycle events of every socket accepted by this
/// engine: connect, inbound text/binary frame, and disconnect. This is the
/// full extent of the "engine transport contract" spec.md §6 describes.
pub trait EngineIoHandler: Send + Sync + 'static {
    /// Opaque per-socket scratch data threaded through [`Socket::data`].
    type Data: Default + Send + Sync + 'static;

    fn on_connect(&self, socket: Arc<Socket<Self::Data>>);
    fn on_disconnect(&self, socket: Arc<Socket<Self::Data>>, reason: DisconnectReason);
    fn on_message(&self, msg: String, socket: Arc<Socket<Self::Data>>);
    fn on_binary(&self, data: Vec<u8>, socket: Arc<Socket<Self::Data>>);
}
