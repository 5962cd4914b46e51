//! The engine-transport-facing side of the core: owns the namespace
//! registry, routes inbound frames to the right namespace/socket, and
//! drives admission (including the v4 auto-connect and v5 connect-timeout
//! compatibility paths) (spec.md §3 "Client", §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use engineioxide::handler::EngineIoHandler;
use engineioxide::socket::{DisconnectReason as EIoDisconnectReason, Frame, Socket as EIoSocket};
use futures::{Future, TryFutureExt};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::adapter::Adapter;
use crate::errors::Error;
use crate::ns::Namespace;
use crate::packet::{Packet, PacketData, PacketDecoder};
use crate::{ProtocolVersion, Socket, SocketIoConfig};

/// Owns every namespace for one [`crate::SocketIo`] instance. Unlike the
/// per-transport "Client" spec.md §3 describes, this is a single
/// long-lived object shared by every connection: routing a packet to the
/// right in-memory [`Socket`] is done by keying each namespace's socket
/// table on the raw engine.io [`engineioxide::Sid`], so there's no
/// separate per-connection object to stand up (see `DESIGN.md`).
#[derive(Debug)]
pub struct Client<A: Adapter> {
    pub(crate) config: Arc<SocketIoConfig>,
    ns: RwLock<HashMap<String, Arc<Namespace<A>>>>,
}

impl<A: Adapter> Client<A> {
    pub fn new(config: Arc<SocketIoConfig>) -> Self {
        Self {
            config,
            ns: RwLock::new(HashMap::new()),
        }
    }

    /// Handles a CONNECT packet for `ns_path`. Unknown namespaces other
    /// than `"/"` get an `invalid_namespace` CONNECT_ERROR reply without
    /// closing the transport (spec.md §7 item 2); `"/"` missing under the
    /// legacy v4 protocol closes the transport outright, since v4 clients
    /// assume the default namespace always exists.
    ///
    /// If `ns_path` isn't the default namespace and the default namespace
    /// hasn't admitted this transport yet, the request is buffered on
    /// [`SocketData::connect_buffer`] and replayed once `"/"` finishes
    /// admission, preserving the ordering the legacy (v4) multiplexing
    /// model assumes (spec.md §4.5 "connectBuffer").
    fn sock_connect(
        &self,
        auth: String,
        ns_path: String,
        esocket: &Arc<EIoSocket<SocketData>>,
    ) -> Result<(), Error> {
        let sid = esocket.id;

        let Some(ns) = self.get_ns(&ns_path) else {
            if ns_path == "/" && ProtocolVersion::from(esocket.protocol) == ProtocolVersion::V4 {
                error!("the default namespace \"/\" must be defined before any v4 connection");
                esocket.close(EIoDisconnectReason::TransportClose);
                return Ok(());
            }
            esocket.emit_packet(Packet::invalid_namespace(ns_path))?;
            return Ok(());
        };

        let default_admitted = esocket.data.default_ns_connected.load(Ordering::Acquire);
        if ns_path != "/" && !default_admitted {
            debug!("buffering connect to {ns_path} until the default namespace is admitted");
            esocket.data.connect_buffer.lock().unwrap().push((ns_path, auth));
            return Ok(());
        }

        let was_default = ns_path == "/";
        match ns.connect(sid, esocket.clone(), auth, self.config.clone()) {
            Ok(()) => {
                #[cfg(feature = "v5")]
                if let Some(tx) = esocket.data.connect_recv_tx.lock().unwrap().take() {
                    tx.send(()).ok();
                }
                if was_default {
                    esocket.data.default_ns_connected.store(true, Ordering::Release);
                    let pending = std::mem::take(&mut *esocket.data.connect_buffer.lock().unwrap());
                    for (buffered_ns, buffered_auth) in pending {
                        self.sock_connect(buffered_auth, buffered_ns, esocket)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                debug!("namespace {ns_path} rejected connection {sid}: {e}");
                Ok(())
            }
        }
    }

    fn sock_propagate_packet(&self, packet: Packet, sid: engineioxide::Sid) -> Result<(), Error> {
        match self.get_ns(&packet.ns) {
            Some(ns) => ns.recv(sid, packet.inner),
            None => {
                debug!("packet for unknown namespace {}", packet.ns);
                Ok(())
            }
        }
    }

    fn dispatch(&self, packet: Packet, socket: &Arc<EIoSocket<SocketData>>) {
        let res = match packet.inner {
            PacketData::Connect(auth) => self.sock_connect(
                auth.map(|v| v.to_string()).unwrap_or_else(|| "null".to_string()),
                packet.ns,
                socket,
            ),
            _ => self.sock_propagate_packet(packet, socket.id),
        };
        if let Err(err) = res {
            error!("error processing packet for socket {}: {}", socket.id, err);
        }
    }

    /// Spawns a task that closes the socket if it hasn't admitted to any
    /// namespace within [`SocketIoConfig::connect_timeout`] (spec.md §7
    /// item 8, v5-only: v4 clients auto-connect to `"/"` synchronously).
    #[cfg(feature = "v5")]
    fn spawn_connect_timeout_task(&self, socket: Arc<EIoSocket<SocketData>>) {
        let (tx, rx) = oneshot::channel();
        socket.data.connect_recv_tx.lock().unwrap().replace(tx);
        let timeout = self.config.connect_timeout;
        tokio::spawn(tokio::time::timeout(timeout, rx).map_err(move |_| {
            debug!("connect timeout elapsed for socket {}", socket.id);
            socket.close(EIoDisconnectReason::TransportClose);
        }));
    }

    pub fn add_ns<C, F, V>(&self, path: String, callback: C)
    where
        C: Fn(Arc<Socket<A>>, V) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
        V: DeserializeOwned + Send + Sync + 'static,
    {
        debug!("adding namespace {path}");
        let ns = Namespace::new(path.clone(), callback);
        self.ns.write().unwrap().insert(path, ns);
    }

    pub fn delete_ns(&self, path: &str) {
        debug!("deleting namespace {path}");
        self.ns.write().unwrap().remove(path);
    }

    pub fn get_ns(&self, path: &str) -> Option<Arc<Namespace<A>>> {
        self.ns.read().unwrap().get(path).cloned()
    }

    /// Forcibly closes every namespace (spec.md §4.6 "close").
    #[tracing::instrument(skip(self))]
    pub(crate) async fn close(&self) {
        debug!("closing all namespaces");
        let namespaces: Vec<_> = self.ns.read().unwrap().values().cloned().collect();
        futures::future::join_all(namespaces.iter().map(|ns| ns.close())).await;
        debug!("all namespaces closed");
    }

    /// Disconnects every currently connected socket, then closes (spec.md
    /// §4.5 "disconnect": "iterate a snapshot of sockets and call each
    /// socket's disconnect(); then close()").
    #[tracing::instrument(skip(self))]
    pub(crate) async fn disconnect(&self) {
        let namespaces: Vec<_> = self.ns.read().unwrap().values().cloned().collect();
        for ns in namespaces {
            for socket in ns.sockets() {
                socket.disconnect(true).ok();
            }
        }
        self.close().await;
    }
}

trait PacketEmit {
    fn emit_packet(&self, packet: Packet) -> Result<(), engineioxide::Error>;
}

impl PacketEmit for EIoSocket<SocketData> {
    fn emit_packet(&self, packet: Packet) -> Result<(), engineioxide::Error> {
        for frame in packet.encode() {
            match frame {
                Frame::Text(s) => self.emit(s)?,
                Frame::Binary(b) => self.emit_binary(b)?,
            }
        }
        Ok(())
    }
}

/// Per-(engine)socket scratch state: the in-progress packet decoder (which
/// reassembles binary attachments across frames) and the bookkeeping the
/// default-namespace admission and connect-timeout paths need.
#[derive(Debug, Default)]
pub struct SocketData {
    decoder: Mutex<PacketDecoder>,
    default_ns_connected: AtomicBool,
    connect_buffer: Mutex<Vec<(String, String)>>,
    #[cfg(feature = "v5")]
    connect_recv_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Thin [`EngineIoHandler`] adapter. Kept separate from [`Client`] so
/// `Client<A>` itself doesn't need to be `Clone`; only this wrapper
/// (cheaply, via [`Arc`]) does, satisfying
/// [`engineioxide::layer::EngineIoLayer`]'s `H: EngineIoHandler + Clone`
/// bound.
#[derive(Debug)]
pub(crate) struct SocketIoHandler<A: Adapter>(pub(crate) Arc<Client<A>>);

impl<A: Adapter> Clone for SocketIoHandler<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Adapter> EngineIoHandler for SocketIoHandler<A> {
    type Data = SocketData;

    #[tracing::instrument(skip(self, socket), fields(sid = socket.id.to_string()))]
    fn on_connect(&self, socket: Arc<EIoSocket<SocketData>>) {
        debug!("engine socket connected");
        let protocol: ProtocolVersion = socket.protocol.into();

        #[cfg(feature = "v4")]
        if protocol == ProtocolVersion::V4 {
            if let Err(e) = self.0.sock_connect("null".into(), "/".into(), &socket) {
                error!("error auto-connecting v4 socket to the default namespace: {e}");
            }
        }

        #[cfg(feature = "v5")]
        if protocol == ProtocolVersion::V5 {
            self.0.spawn_connect_timeout_task(socket);
        }
    }

    #[tracing::instrument(skip(self, socket), fields(sid = socket.id.to_string()))]
    fn on_disconnect(&self, socket: Arc<EIoSocket<SocketData>>, reason: EIoDisconnectReason) {
        debug!("engine socket disconnected: {reason}");
        let namespaces: Vec<_> = self.0.ns.read().unwrap().values().cloned().collect();
        for ns in namespaces {
            if let Some(s) = ns.get_socket(socket.id) {
                if let Err(e) = s.close(reason.into()) {
                    error!("error closing socket {} in namespace {}: {}", socket.id, ns.path, e);
                }
            }
        }
    }

    fn on_message(&self, msg: String, socket: Arc<EIoSocket<SocketData>>) {
        let decoded = socket.data.decoder.lock().unwrap().add(Frame::Text(msg));
        match decoded {
            Ok(Some(packet)) => self.0.dispatch(packet, &socket),
            Ok(None) => {}
            Err(e) => {
                debug!("socket {} sent a malformed packet: {e}", socket.id);
                socket.close(EIoDisconnectReason::PacketParsingError);
            }
        }
    }

    fn on_binary(&self, data: Vec<u8>, socket: Arc<EIoSocket<SocketData>>) {
        let decoded = socket.data.decoder.lock().unwrap().add(Frame::Binary(data));
        match decoded {
            Ok(Some(packet)) => self.0.dispatch(packet, &socket),
            Ok(None) => {}
            Err(e) => {
                debug!("socket {} sent an unexpected binary frame: {e}", socket.id);
                socket.close(EIoDisconnectReason::PacketParsingError);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LocalAdapter;

    fn dummy_esocket() -> Arc<EIoSocket<SocketData>> {
        Arc::new(EIoSocket::new_dummy(engineioxide::Sid::new(), Box::new(|_, _| {})))
    }

    fn noop_handler(
    ) -> impl Fn(Arc<Socket<LocalAdapter>>, serde_json::Value) -> std::future::Ready<()> + Send + Sync + 'static
    {
        |_socket, _auth| std::future::ready(())
    }

    #[tokio::test]
    async fn non_default_namespace_connect_is_buffered_until_default_admits() {
        let client = Client::<LocalAdapter>::new(Arc::new(SocketIoConfig::default()));
        client.add_ns("/".to_string(), noop_handler());
        client.add_ns("/chat".to_string(), noop_handler());

        let esocket = dummy_esocket();
        let sid = esocket.id;

        client
            .sock_connect("null".to_string(), "/chat".to_string(), &esocket)
            .unwrap();
        assert!(client.get_ns("/chat").unwrap().get_socket(sid).is_none());

        client
            .sock_connect("null".to_string(), "/".to_string(), &esocket)
            .unwrap();
        assert!(client.get_ns("/").unwrap().get_socket(sid).is_some());
        assert!(client.get_ns("/chat").unwrap().get_socket(sid).is_some());
    }

    #[tokio::test]
    async fn unknown_namespace_gets_connect_error_without_closing_the_transport() {
        let client = Client::<LocalAdapter>::new(Arc::new(SocketIoConfig::default()));
        client.add_ns("/".to_string(), noop_handler());

        let esocket = dummy_esocket();
        client
            .sock_connect("null".to_string(), "/nope".to_string(), &esocket)
            .unwrap();
        assert!(!esocket.is_closed());
    }
}
