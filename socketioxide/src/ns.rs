//! A namespace: its socket table, its sequential admission middleware
//! chain, and the broadcast entry points `Operators` ultimately calls into
//! (spec.md §3 "Namespace", §4.4).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use engineioxide::socket::Socket as EIoSocket;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::adapter::Adapter;
use crate::client::SocketData;
use crate::config::SocketIoConfig;
use crate::errors::Error;
use crate::handshake::Handshake;
use crate::operators::{Operators, Room, RoomParam};
use crate::packet::Packet;
use crate::socket::{DisconnectReason, Socket, SocketId};

type Middleware<A> = Box<dyn Fn(&Arc<Socket<A>>) -> Result<(), Error> + Send + Sync + 'static>;

/// Type-erases the user's `Fn(Arc<Socket<A>>, V) -> impl Future<Output =
/// ()>` connection handler so [`Namespace`] doesn't need to be generic over
/// it (spec.md §4.4 "add").
trait ConnectCaller<A: Adapter>: Send + Sync + 'static {
    fn call(&self, socket: Arc<Socket<A>>, auth: Value);
}

struct ConnectHandler<C, F, V> {
    callback: C,
    _fut: std::marker::PhantomData<F>,
    _value: std::marker::PhantomData<V>,
}

impl<C, F, V, A> ConnectCaller<A> for ConnectHandler<C, F, V>
where
    C: Fn(Arc<Socket<A>>, V) -> F + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
    V: DeserializeOwned + Send + Sync + 'static,
    A: Adapter,
{
    fn call(&self, socket: Arc<Socket<A>>, auth: Value) {
        match serde_json::from_value(auth) {
            Ok(auth) => {
                tokio::spawn((self.callback)(socket, auth));
            }
            Err(e) => error!("failed to deserialize the connect auth payload: {e}"),
        }
    }
}

/// One socket.io namespace: a path, the sockets currently admitted to it,
/// the adapter that owns room membership for them, and the sequential
/// middleware chain new connections run through before admission
/// finalizes (spec.md §9 "the middleware chain here runs strictly in
/// sequence, unlike the source's concurrent `run()`").
pub struct Namespace<A: Adapter> {
    pub path: String,
    pub(crate) adapter: A,
    sockets: RwLock<HashMap<SocketId, Arc<Socket<A>>>>,
    middlewares: RwLock<Vec<Middleware<A>>>,
    connect_handler: Box<dyn ConnectCaller<A>>,
}

impl<A: Adapter> Namespace<A> {
    pub(crate) fn new<C, F, V>(path: String, callback: C) -> Arc<Self>
    where
        C: Fn(Arc<Socket<A>>, V) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
        V: DeserializeOwned + Send + Sync + 'static,
    {
        Arc::new_cyclic(|weak| {
            let adapter = A::new(weak.clone());
            adapter.init();
            Self {
                path,
                adapter,
                sockets: RwLock::new(HashMap::new()),
                middlewares: RwLock::new(Vec::new()),
                connect_handler: Box::new(ConnectHandler {
                    callback,
                    _fut: std::marker::PhantomData,
                    _value: std::marker::PhantomData,
                }),
            }
        })
    }

    /// Appends a middleware to the admission chain. Middlewares run in
    /// registration order; the first one to return `Err` aborts admission
    /// (spec.md §4.4 "use", §9).
    pub fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(&Arc<Socket<A>>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.middlewares.write().unwrap().push(Box::new(middleware));
    }

    /// Runs admission for a newly-handshaking socket: builds the
    /// [`Socket`], runs it through the middleware chain, and on success
    /// registers it, joins its self-addressed room, sends the CONNECT
    /// acknowledgement, and invokes the connection handler. On middleware
    /// rejection a CONNECT_ERROR is sent instead and the socket is
    /// discarded without ever being registered (spec.md §4.4 "connect").
    pub(crate) fn connect(
        self: &Arc<Self>,
        sid: SocketId,
        esocket: Arc<EIoSocket<SocketData>>,
        auth_raw: String,
        config: Arc<SocketIoConfig>,
    ) -> Result<(), Error> {
        let auth: Value = if auth_raw.is_empty() || auth_raw == "null" {
            Value::Null
        } else {
            serde_json::from_str(&auth_raw)?
        };

        let protocol = esocket.protocol.into();
        let issued_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let handshake = Handshake::new(auth.clone(), &esocket.req_parts, None, issued_at_ms);
        let socket = Arc::new(Socket::new(sid, esocket, config, self.clone(), handshake, protocol));

        for middleware in self.middlewares.read().unwrap().iter() {
            if let Err(err) = middleware(&socket) {
                socket
                    .send(Packet::connect_error(self.path.clone(), err.connect_error_message()))
                    .ok();
                return Err(err);
            }
        }

        self.sockets.write().unwrap().insert(sid, socket.clone());
        self.adapter.add_all(sid, vec![sid.to_string()]);
        socket.send(Packet::connected(self.path.clone(), sid))?;
        self.connect_handler.call(socket, auth);
        Ok(())
    }

    pub(crate) fn recv(&self, sid: SocketId, data: crate::packet::PacketData) -> Result<(), Error> {
        match self.get_socket(sid) {
            Some(socket) => socket.recv(data),
            None => Ok(()),
        }
    }

    pub fn get_socket(&self, sid: SocketId) -> Option<Arc<Socket<A>>> {
        self.sockets.read().unwrap().get(&sid).cloned()
    }

    pub(crate) fn remove_socket(&self, sid: SocketId) {
        self.sockets.write().unwrap().remove(&sid);
    }

    pub fn sockets(&self) -> Vec<Arc<Socket<A>>> {
        self.sockets.read().unwrap().values().cloned().collect()
    }

    /// Forcibly tears down every socket still admitted to this namespace
    /// (spec.md §4.6 "close").
    pub(crate) async fn close(&self) {
        let sockets: Vec<_> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.send(Packet::disconnect(self.path.clone())).ok();
            if let Err(e) = socket.close(DisconnectReason::ClosingServer) {
                error!("error closing socket during namespace shutdown: {e}");
            }
        }
        self.adapter.close();
    }

    // Namespace-level emission: always targets the full connected set (or
    // an explicit room selection), and never carries an ack callback
    // (spec.md §9 "namespace-level emit forbids ack callbacks, since no
    // single socket owns the reply").

    pub fn to(self: &Arc<Self>, rooms: impl RoomParam) -> Operators<A> {
        Operators::new(self.clone(), None).to(rooms)
    }

    pub fn r#in(self: &Arc<Self>, rooms: impl RoomParam) -> Operators<A> {
        self.to(rooms)
    }

    pub fn except(self: &Arc<Self>, rooms: impl RoomParam) -> Operators<A> {
        Operators::new(self.clone(), None).except(rooms)
    }

    pub fn local(self: &Arc<Self>) -> Operators<A> {
        Operators::new(self.clone(), None).local()
    }

    pub fn volatile(self: &Arc<Self>) -> Operators<A> {
        Operators::new(self.clone(), None).volatile()
    }

    pub fn emit(self: &Arc<Self>, event: impl Into<String>, data: impl Serialize) -> Result<(), Error> {
        Operators::new(self.clone(), None).broadcast().emit(event, data)
    }

    pub fn send(self: &Arc<Self>, data: impl Serialize) -> Result<(), Error> {
        self.emit("message", data)
    }

    /// The ids of every socket in the given room(s) (spec.md §4.4
    /// "clients").
    pub fn socket_ids(&self, rooms: Vec<Room>) -> Vec<SocketId> {
        self.adapter.sockets(rooms)
    }
}

impl<A: Adapter> std::fmt::Debug for Namespace<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("path", &self.path)
            .field("sockets", &self.sockets.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use engineioxide::Sid;

    use crate::adapter::LocalAdapter;

    fn dummy_esocket() -> Arc<EIoSocket<SocketData>> {
        Arc::new(EIoSocket::new_dummy(Sid::new(), Box::new(|_, _| {})))
    }

    fn test_config() -> Arc<SocketIoConfig> {
        Arc::new(SocketIoConfig::default())
    }

    #[tokio::test]
    async fn connect_registers_socket_and_runs_handler() {
        let connected = Arc::new(AtomicUsize::new(0));
        let connected2 = connected.clone();
        let ns = Namespace::<LocalAdapter>::new(
            "/".to_string(),
            move |_socket: Arc<Socket<LocalAdapter>>, _auth: Value| {
                let connected = connected2.clone();
                async move {
                    connected.fetch_add(1, AtomicOrdering::SeqCst);
                }
            },
        );

        let esocket = dummy_esocket();
        let sid = esocket.id;
        ns.connect(sid, esocket, "null".to_string(), test_config()).unwrap();

        assert!(ns.get_socket(sid).is_some());
        tokio::task::yield_now().await;
        assert_eq!(connected.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn middleware_rejection_prevents_registration() {
        let ns = Namespace::<LocalAdapter>::new(
            "/".to_string(),
            |_: Arc<Socket<LocalAdapter>>, _: Value| async {},
        );
        ns.add_middleware(|_socket| Err(Error::MiddlewareRejected("nope".into())));

        let esocket = dummy_esocket();
        let sid = esocket.id;
        let res = ns.connect(sid, esocket, "null".to_string(), test_config());
        assert!(res.is_err());
        assert!(ns.get_socket(sid).is_none());
    }

    #[tokio::test]
    async fn middlewares_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ns = Namespace::<LocalAdapter>::new(
            "/".to_string(),
            |_: Arc<Socket<LocalAdapter>>, _: Value| async {},
        );
        let o1 = order.clone();
        ns.add_middleware(move |_| {
            o1.lock().unwrap().push(1);
            Ok(())
        });
        let o2 = order.clone();
        ns.add_middleware(move |_| {
            o2.lock().unwrap().push(2);
            Ok(())
        });

        let esocket = dummy_esocket();
        let sid = esocket.id;
        ns.connect(sid, esocket, "null".to_string(), test_config()).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn close_disconnects_every_registered_socket() {
        let ns = Namespace::<LocalAdapter>::new(
            "/".to_string(),
            |_: Arc<Socket<LocalAdapter>>, _: Value| async {},
        );
        let esocket = dummy_esocket();
        let sid = esocket.id;
        ns.connect(sid, esocket, "null".to_string(), test_config()).unwrap();
        assert!(ns.get_socket(sid).is_some());

        ns.close().await;
        assert!(ns.get_socket(sid).is_none());
    }
}
