//! A single client connected to one namespace: local event listeners,
//! the ack-id counter and pending-ack map, room membership, and the
//! chainable broadcast operators (spec.md §3, §4.3 "Socket").

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use engineioxide::socket::DisconnectReason as EIoDisconnectReason;
use futures::TryFutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use engineioxide::socket::{Frame, Socket as EIoSocket};

use crate::ack::{AckError, AckResponse, AckSender};
use crate::adapter::Adapter;
use crate::client::SocketData;
use crate::config::SocketIoConfig;
use crate::errors::Error;
use crate::handshake::{Handshake, ProtocolVersion};
use crate::ns::Namespace;
use crate::operators::{Operators, Room, RoomParam};
use crate::packet::{BinaryPacket, Packet, PacketData};

/// Uniquely identifies a socket within the namespace it belongs to. Each
/// [`Namespace`] keeps its own table, so this doesn't need to embed the
/// namespace path the way the wire-level `<nsp>#<id>` identifier does.
pub type SocketId = engineioxide::Sid;

type BoxAsyncFut<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What an event handler hands back to be turned into an ack reply, if
/// the triggering packet carried an ack id (spec.md §4.3 "ack callback").
pub enum Ack<T>
where
    T: Serialize + Send + 'static,
{
    Data(T),
    DataBin(T, Vec<Vec<u8>>),
    Bin(Vec<Vec<u8>>),
    None,
}

impl From<()> for Ack<()> {
    fn from(_: ()) -> Self {
        Ack::None
    }
}

/// Why a socket stopped being part of a namespace. The engine-transport
/// reasons ([`EIoDisconnectReason`]) are extended with the two reasons
/// that only make sense at the socket.io layer (spec.md §4.3, §7 item 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    TransportClose,
    MultipleHttpPollingError,
    PacketParsingError,
    TransportError,
    HeartbeatTimeout,
    ClosingServer,
    /// The client sent a DISCONNECT packet for this namespace.
    ClientNSDisconnect,
    /// The server forcibly disconnected this socket (`Socket::disconnect`,
    /// middleware rejection, or `Namespace::close`).
    ServerNSDisconnect,
    /// `Socket::disconnect(true)` tore down the whole client transport,
    /// not just this namespace (spec.md §4.5 `Client::close`).
    ForcedClose,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DisconnectReason::*;
        let s = match self {
            TransportClose => "client gracefully closed the connection",
            MultipleHttpPollingError => "client sent multiple polling requests at the same time",
            PacketParsingError => "client sent a bad request / the packet could not be parsed",
            TransportError => "the connection was abruptly closed",
            HeartbeatTimeout => "client did not send a PONG packet in time",
            ClosingServer => "server is being closed",
            ClientNSDisconnect => "client namespace disconnect",
            ServerNSDisconnect => "server namespace disconnect",
            ForcedClose => "forced server close",
        };
        f.write_str(s)
    }
}

impl From<EIoDisconnectReason> for DisconnectReason {
    fn from(reason: EIoDisconnectReason) -> Self {
        use DisconnectReason::*;
        match reason {
            EIoDisconnectReason::TransportClose => TransportClose,
            EIoDisconnectReason::MultipleHttpPollingError => MultipleHttpPollingError,
            EIoDisconnectReason::PacketParsingError => PacketParsingError,
            EIoDisconnectReason::TransportError => TransportError,
            EIoDisconnectReason::HeartbeatTimeout => HeartbeatTimeout,
            EIoDisconnectReason::ClosingServer => ClosingServer,
        }
    }
}

trait MessageCaller<A: Adapter>: Send + Sync + 'static {
    fn call(
        &self,
        s: Arc<Socket<A>>,
        v: Value,
        bin: Option<Vec<Vec<u8>>>,
        ack_id: Option<i64>,
    ) -> Result<(), Error>;
}

struct MessageHandler<Param, RetV, F, A> {
    _param: std::marker::PhantomData<Param>,
    _ret: std::marker::PhantomData<RetV>,
    _adapter: std::marker::PhantomData<A>,
    handler: F,
}

impl<Param, RetV, F, A> MessageCaller<A> for MessageHandler<Param, RetV, F, A>
where
    Param: DeserializeOwned + Send + Sync + 'static,
    RetV: Serialize + Send + 'static,
    F: Fn(Arc<Socket<A>>, Param, Option<Vec<Vec<u8>>>) -> BoxAsyncFut<Result<Ack<RetV>, Error>>
        + Send
        + Sync
        + 'static,
    A: Adapter,
{
    fn call(
        &self,
        s: Arc<Socket<A>>,
        v: Value,
        bin: Option<Vec<Vec<u8>>>,
        ack_id: Option<i64>,
    ) -> Result<(), Error> {
        let v = match v {
            Value::Array(mut items) if items.len() == 1 => items.pop().unwrap(),
            v => v,
        };
        let v: Param = serde_json::from_value(v)?;
        let owned = s.clone();
        let fut = (self.handler)(s, v, bin);
        if let Some(ack_id) = ack_id {
            tokio::spawn(fut.map_ok(move |ack| match ack {
                Ack::Data(d) => owned.send_ack(ack_id, d),
                Ack::DataBin(d, b) => owned.send_bin_ack(ack_id, d, b),
                Ack::Bin(b) => owned.send_bin_ack(ack_id, json!(null), b),
                Ack::None => Ok(()),
            }));
        } else {
            tokio::spawn(fut);
        }
        Ok(())
    }
}

type BoxedDisconnectHandler<A> = Box<dyn Fn(Arc<Socket<A>>, DisconnectReason) + Send + Sync>;

/// Reserved event names that never reach a handler because they drive the
/// protocol itself (spec.md §4.3 "reserved events").
pub const RESERVED_EVENTS: &[&str] = &[
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

pub struct Socket<A: Adapter> {
    pub id: SocketId,
    pub handshake: Handshake,
    pub(crate) protocol: ProtocolVersion,
    esocket: Arc<EIoSocket<SocketData>>,
    config: Arc<SocketIoConfig>,
    ns: Arc<Namespace<A>>,
    message_handlers: RwLock<HashMap<String, Box<dyn MessageCaller<A>>>>,
    disconnect_handler: std::sync::Mutex<Option<BoxedDisconnectHandler<A>>>,
    ack_message: std::sync::Mutex<HashMap<i64, AckSender>>,
    ack_counter: AtomicI64,
    closed: AtomicBool,
}

impl<A: Adapter> Socket<A> {
    pub(crate) fn new(
        id: SocketId,
        esocket: Arc<EIoSocket<SocketData>>,
        config: Arc<SocketIoConfig>,
        ns: Arc<Namespace<A>>,
        handshake: Handshake,
        protocol: ProtocolVersion,
    ) -> Self {
        Self {
            id,
            handshake,
            protocol,
            esocket,
            config,
            ns,
            message_handlers: RwLock::new(HashMap::new()),
            disconnect_handler: std::sync::Mutex::new(None),
            ack_message: std::sync::Mutex::new(HashMap::new()),
            ack_counter: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether this socket is still admitted to its namespace (spec.md §8
    /// "connected iff present in nsp.connected").
    pub fn connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn disconnected(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers a listener for `event`. Reserved event names (see
    /// [`RESERVED_EVENTS`]) are accepted but will never fire, since the
    /// packets that would carry them never make it to dispatch.
    pub fn on<C, F, V, RetV>(&self, event: impl Into<String>, callback: C)
    where
        C: Fn(Arc<Socket<A>>, V, Option<Vec<Vec<u8>>>) -> F + Send + Sync + 'static,
        F: Future<Output = Result<Ack<RetV>, Error>> + Send + 'static,
        V: DeserializeOwned + Send + Sync + 'static,
        RetV: Serialize + Send + 'static,
    {
        let handler = move |s, v, p| Box::pin(callback(s, v, p)) as BoxAsyncFut<_>;
        self.message_handlers.write().unwrap().insert(
            event.into(),
            Box::new(MessageHandler {
                _param: std::marker::PhantomData,
                _ret: std::marker::PhantomData,
                _adapter: std::marker::PhantomData,
                handler,
            }),
        );
    }

    /// Registers the single disconnect handler for this socket, replacing
    /// any previous one.
    pub fn on_disconnect<C>(&self, callback: C)
    where
        C: Fn(Arc<Socket<A>>, DisconnectReason) + Send + Sync + 'static,
    {
        *self.disconnect_handler.lock().unwrap() = Some(Box::new(callback));
    }

    /// Sends `event` to this socket only. A reserved event name (see
    /// [`RESERVED_EVENTS`]) is silently dropped rather than producing a
    /// wire packet, since no client-side listener could ever legitimately
    /// be addressed by one (spec.md §4.3).
    pub fn emit(&self, event: impl Into<String>, data: impl Serialize) -> Result<(), Error> {
        let event = event.into();
        if RESERVED_EVENTS.contains(&event.as_str()) {
            return Ok(());
        }
        let data = serde_json::to_value(data)?;
        self.send(Packet::event(self.ns.path.clone(), event, data))
    }

    pub async fn emit_with_ack<V: DeserializeOwned>(
        &self,
        event: impl Into<String>,
        data: impl Serialize,
    ) -> Result<AckResponse<V>, AckError> {
        let data = serde_json::to_value(data)?;
        let packet = Packet::event(self.ns.path.clone(), event.into(), data);
        self.send_with_ack(packet, None).await
    }

    // Room membership.

    pub fn join(&self, rooms: impl RoomParam) {
        self.ns.adapter.add_all(self.id, rooms.into_room_iter().collect());
    }

    pub fn leave(&self, rooms: impl RoomParam) {
        self.ns.adapter.del(self.id, rooms.into_room_iter().collect());
    }

    pub fn leave_all(&self) {
        self.ns.adapter.del_all(self.id);
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.ns.adapter.socket_rooms(self.id)
    }

    // Broadcast operators, each anchored on this socket (excludes it by
    // default, per spec.md §5 "broadcast excludes the emitting socket").

    pub fn to(self: &Arc<Self>, rooms: impl RoomParam) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).to(rooms)
    }

    pub fn except(self: &Arc<Self>, rooms: impl RoomParam) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).except(rooms)
    }

    pub fn local(self: &Arc<Self>) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).local()
    }

    pub fn timeout(self: &Arc<Self>, timeout: Duration) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).timeout(timeout)
    }

    pub fn bin(self: &Arc<Self>, binary: Vec<Vec<u8>>) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).bin(binary)
    }

    pub fn broadcast(self: &Arc<Self>) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).broadcast()
    }

    /// Forcibly disconnects this socket (spec.md §4.3 `disconnect(close?)`,
    /// §7 item 6 "forced close"). If `close` is true the entire client
    /// transport is torn down, not just this namespace's socket; otherwise
    /// only this socket is removed, with reason
    /// [`DisconnectReason::ServerNSDisconnect`].
    pub fn disconnect(self: &Arc<Self>, close: bool) -> Result<(), Error> {
        if self.disconnected() {
            return Ok(());
        }
        self.send(Packet::disconnect(self.ns.path.clone())).ok();
        if close {
            self.clone().close(DisconnectReason::ForcedClose)
        } else {
            self.clone().close(DisconnectReason::ServerNSDisconnect)
        }
    }

    pub fn ns(&self) -> &str {
        &self.ns.path
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// The HTTP request parts that established the underlying transport
    /// (headers, URI, method), for reading anything the [`Handshake`]
    /// snapshot doesn't already surface (spec.md §4.3 handshake accessors).
    pub fn req_parts(&self) -> &http::request::Parts {
        &self.esocket.req_parts
    }

    /// Marks the next emit as droppable: skipped rather than queued if
    /// this socket's transport isn't immediately writable (spec.md §4.3
    /// flag accessors, §8 scenario 6).
    pub fn volatile(self: &Arc<Self>) -> Operators<A> {
        Operators::new(self.ns.clone(), Some(self.id)).volatile()
    }

    /// Whether a write to this socket right now would not block or be
    /// dropped. Backs the `volatile` flag (spec.md §4.2, §6).
    pub fn writable(&self) -> bool {
        self.esocket.writable()
    }

    // Internal send path. `Packet` always carries its own binary
    // attachments inline (via `BinaryPacket`), so there's no separate
    // payload argument to thread through here; we just encode it to wire
    // frames and hand each one to the underlying engine socket.

    pub(crate) fn send(&self, packet: Packet) -> Result<(), Error> {
        for frame in packet.encode() {
            match frame {
                Frame::Text(s) => self.esocket.emit(s)?,
                Frame::Binary(b) => self.esocket.emit_binary(b)?,
            }
        }
        Ok(())
    }

    pub(crate) async fn send_with_ack<V: DeserializeOwned>(
        &self,
        mut packet: Packet,
        timeout: Option<Duration>,
    ) -> Result<AckResponse<V>, AckError> {
        let (tx, rx) = oneshot::channel();
        let ack_id = self.ack_counter.fetch_add(1, Ordering::SeqCst);
        self.ack_message.lock().unwrap().insert(ack_id, tx);
        packet.inner.set_ack_id(ack_id);
        self.send(packet)?;
        let timeout = timeout.unwrap_or(self.config.ack_timeout);
        let (data, bin) = tokio::time::timeout(timeout, rx).await??;
        Ok((serde_json::from_value(data)?, bin))
    }

    fn send_ack(&self, ack_id: i64, data: impl Serialize) -> Result<(), Error> {
        let data = serde_json::to_value(data)?;
        self.send(Packet::ack(self.ns.path.clone(), data, ack_id))
    }

    fn send_bin_ack(&self, ack_id: i64, data: impl Serialize, bin: Vec<Vec<u8>>) -> Result<(), Error> {
        let data = serde_json::to_value(data)?;
        self.send(Packet::bin_ack(self.ns.path.clone(), data, bin, ack_id))
    }

    // Dispatch incoming packets.

    pub(crate) fn recv(self: Arc<Self>, packet: PacketData) -> Result<(), Error> {
        match packet {
            PacketData::Event(e, data, ack) => self.recv_event(e, data, None, ack),
            PacketData::BinaryEvent(e, packet, ack) => {
                self.recv_event(e, packet.data, Some(packet.bin), ack)
            }
            PacketData::EventAck(data, ack_id) => self.recv_ack(data, None, ack_id),
            PacketData::BinaryAck(packet, ack_id) => self.recv_ack(packet.data, Some(packet.bin), ack_id),
            PacketData::Disconnect => self.close(DisconnectReason::ClientNSDisconnect),
            _ => Ok(()),
        }
    }

    fn recv_event(
        self: Arc<Self>,
        event: String,
        data: Value,
        bin: Option<Vec<Vec<u8>>>,
        ack: Option<i64>,
    ) -> Result<(), Error> {
        if RESERVED_EVENTS.contains(&event.as_str()) {
            return Ok(());
        }
        if let Some(handler) = self.message_handlers.read().unwrap().get(&event) {
            handler.call(self.clone(), data, bin, ack)?;
        }
        Ok(())
    }

    fn recv_ack(self: Arc<Self>, data: Value, bin: Option<Vec<Vec<u8>>>, ack_id: i64) -> Result<(), Error> {
        if let Some(tx) = self.ack_message.lock().unwrap().remove(&ack_id) {
            tx.send((data, bin)).ok();
        }
        Ok(())
    }

    /// Tears this socket down: fires the disconnect handler, leaves every
    /// room, and removes it from the namespace. Idempotent: a socket that
    /// is already closed ignores further calls, including a duplicate
    /// `onclose` racing a caller-initiated `disconnect()` (spec.md §4.3
    /// "close", §8 "onclose is idempotent").
    pub(crate) fn close(self: Arc<Self>, reason: DisconnectReason) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // A namespace-shutdown or forced-close reason means this socket's
        // whole transport is going away, not just its membership in this
        // namespace (spec.md §4.6 "close": "if transport open, close it").
        if matches!(reason, DisconnectReason::ClosingServer | DisconnectReason::ForcedClose) {
            self.esocket.close(EIoDisconnectReason::ClosingServer);
        }
        if let Some(handler) = self.disconnect_handler.lock().unwrap().take() {
            handler(self.clone(), reason);
        }
        self.ns.adapter.del_all(self.id);
        self.ns.remove_socket(self.id);
        Ok(())
    }
}

impl<A: Adapter> fmt::Debug for Socket<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("ns", &self.ns.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use engineioxide::Sid;

    use crate::adapter::LocalAdapter;

    fn test_socket() -> Arc<Socket<LocalAdapter>> {
        let ns = Namespace::<LocalAdapter>::new(
            "/".to_string(),
            |_: Arc<Socket<LocalAdapter>>, _: Value| async {},
        );
        let esocket: Arc<EIoSocket<SocketData>> =
            Arc::new(EIoSocket::new_dummy(Sid::new(), Box::new(|_, _| {})));
        let handshake = Handshake::new(Value::Null, &esocket.req_parts, None, 0);
        Arc::new(Socket::new(
            Sid::new(),
            esocket,
            Arc::new(SocketIoConfig::default()),
            ns,
            handshake,
            ProtocolVersion::V5,
        ))
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let socket = test_socket();
        assert!(socket.connected());
        socket.clone().close(DisconnectReason::ClientNSDisconnect).unwrap();
        assert!(socket.disconnected());
        socket.clone().close(DisconnectReason::ServerNSDisconnect).unwrap();
    }

    #[tokio::test]
    async fn disconnect_on_an_already_closed_socket_is_a_noop() {
        let socket = test_socket();
        socket.clone().close(DisconnectReason::ClientNSDisconnect).unwrap();
        assert!(socket.disconnect(false).is_ok());
    }

    #[tokio::test]
    async fn emit_of_reserved_event_is_silently_dropped() {
        let socket = test_socket();
        assert!(socket.emit("disconnect", json!(null)).is_ok());
    }

    #[tokio::test]
    async fn disconnect_handler_fires_exactly_once() {
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let socket = test_socket();
        let fired2 = fired.clone();
        socket.on_disconnect(move |_, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        socket.clone().close(DisconnectReason::ClientNSDisconnect).unwrap();
        socket.clone().close(DisconnectReason::ServerNSDisconnect).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
