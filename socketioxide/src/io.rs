//! The public entry point: owns the namespace registry through a
//! [`Client`], proxies the default namespace's chainable emission API at
//! the top level, and mounts onto `tower`/`axum` the same way
//! [`engineioxide::layer::EngineIoLayer`] does (spec.md §4.6 "Server").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use engineioxide::config::EngineIoConfig;
use engineioxide::layer::EngineIoLayer;
use engineioxide::service::EngineIoService;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::Layer;

use crate::adapter::{Adapter, LocalAdapter};
use crate::client::{Client, SocketIoHandler};
use crate::config::{SocketIoConfig, SocketIoConfigBuilder};
use crate::errors::Error;
use crate::ns::Namespace;
use crate::operators::{Operators, RoomParam};
use crate::socket::Socket;

/// Accumulates configuration before registering the default namespace's
/// connection handler and producing a ready-to-mount [`SocketIoLayer`]
/// (spec.md §4.6 "of(\"/\")").
pub struct SocketIoBuilder {
    config: SocketIoConfigBuilder,
    engine_config: EngineIoConfig,
}

impl Default for SocketIoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketIoBuilder {
    pub fn new() -> Self {
        Self {
            config: SocketIoConfig::builder(),
            engine_config: EngineIoConfig {
                req_path: SocketIoConfig::default().req_path,
                ..EngineIoConfig::default()
            },
        }
    }

    pub fn req_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.engine_config = EngineIoConfig {
            req_path: path.clone(),
            ..self.engine_config
        };
        self.config = self.config.req_path(path);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.ack_timeout(timeout);
        self
    }

    /// Bounds the outbound per-socket frame queue, forwarded down to
    /// [`EngineIoConfig::max_buffer_size`] (spec.md §6 back-compat
    /// `"destroy buffer size"` → `maxHttpBufferSize`).
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config = self.config.max_buffer_size(size);
        self.engine_config.max_buffer_size = size;
        self
    }

    pub fn engine_config(mut self, config: EngineIoConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Finishes construction, registering `on_connect` as the default
    /// (`"/"`) namespace's connection handler, then returns the
    /// `tower::Layer` to mount plus a handle for emitting/administering
    /// from outside any connection callback.
    pub fn build<A, C, F, V>(self, on_connect: C) -> (SocketIoLayer<A>, SocketIo<A>)
    where
        A: Adapter,
        C: Fn(Arc<Socket<A>>, V) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
        V: DeserializeOwned + Send + Sync + 'static,
    {
        let config = Arc::new(self.config.build());
        let client = Arc::new(Client::new(config));
        client.add_ns("/".to_string(), on_connect);
        let io = SocketIo { client: client.clone() };
        let layer = SocketIoLayer::new(client, self.engine_config);
        (layer, io)
    }
}

/// Top-level handle returned by [`SocketIoBuilder::build`]. Proxies
/// `to`/`except`/`emit`/`send`/`use_middleware`/... to the default
/// namespace exactly as the JS `io.emit(...) === io.of("/").emit(...)`
/// convenience does (spec.md §4.6), and owns namespace registration and
/// server-wide shutdown.
pub struct SocketIo<A: Adapter = LocalAdapter> {
    client: Arc<Client<A>>,
}

impl<A: Adapter> Clone for SocketIo<A> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<A: Adapter> SocketIo<A> {
    pub fn builder() -> SocketIoBuilder {
        SocketIoBuilder::new()
    }

    /// Registers (or replaces) the connection handler for `path` (spec.md
    /// §4.6 "of").
    pub fn of<C, F, V>(&self, path: impl Into<String>, on_connect: C) -> &Self
    where
        C: Fn(Arc<Socket<A>>, V) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
        V: DeserializeOwned + Send + Sync + 'static,
    {
        self.client.add_ns(normalize_ns(path.into()), on_connect);
        self
    }

    pub fn get_ns(&self, path: &str) -> Option<Arc<Namespace<A>>> {
        self.client.get_ns(&normalize_ns(path.to_string()))
    }

    fn default_ns(&self) -> Arc<Namespace<A>> {
        self.client
            .get_ns("/")
            .expect("the default namespace is registered at SocketIoBuilder::build time")
    }

    pub fn to(&self, rooms: impl RoomParam) -> Operators<A> {
        self.default_ns().to(rooms)
    }

    pub fn r#in(&self, rooms: impl RoomParam) -> Operators<A> {
        self.to(rooms)
    }

    pub fn except(&self, rooms: impl RoomParam) -> Operators<A> {
        self.default_ns().except(rooms)
    }

    pub fn local(&self) -> Operators<A> {
        self.default_ns().local()
    }

    pub fn emit(&self, event: impl Into<String>, data: impl Serialize) -> Result<(), Error> {
        self.default_ns().emit(event, data)
    }

    pub fn send(&self, data: impl Serialize) -> Result<(), Error> {
        self.default_ns().send(data)
    }

    pub fn write(&self, data: impl Serialize) -> Result<(), Error> {
        self.send(data)
    }

    pub fn sockets(&self) -> Vec<Arc<Socket<A>>> {
        self.default_ns().sockets()
    }

    /// Appends a middleware to the default namespace's admission chain
    /// (spec.md §4.4 "use").
    pub fn use_middleware<F>(&self, middleware: F) -> &Self
    where
        F: Fn(&Arc<Socket<A>>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.default_ns().add_middleware(middleware);
        self
    }

    /// Forces every connected socket closed, then tears down every
    /// namespace (spec.md §4.6 "close").
    pub async fn close(&self) {
        self.client.close().await;
    }

    /// Disconnects every currently connected socket (tearing down its
    /// whole transport), then closes (spec.md §4.5 "disconnect").
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }
}

/// The [`tower::Layer`] produced by [`SocketIoBuilder::build`].
pub struct SocketIoLayer<A: Adapter> {
    inner: EngineIoLayer<SocketIoHandler<A>>,
}

impl<A: Adapter> SocketIoLayer<A> {
    fn new(client: Arc<Client<A>>, engine_config: EngineIoConfig) -> Self {
        Self {
            inner: EngineIoLayer::from_config(SocketIoHandler(client), engine_config),
        }
    }
}

impl<A: Adapter, S: Clone> Layer<S> for SocketIoLayer<A> {
    type Service = EngineIoService<SocketIoHandler<A>, S>;

    fn layer(&self, inner: S) -> Self::Service {
        self.inner.layer(inner)
    }
}

fn normalize_ns(mut path: String) -> String {
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}
