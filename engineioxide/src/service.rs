//! The `tower::Service` that terminates HTTP requests into engine.io
//! sessions: handshake (`GET .../engine.io/?transport=...`), WebSocket
//! upgrade, and long-polling `GET`/`POST`.
//!
//! This is glue: spec.md explicitly puts the transport's handshake,
//! framing, pings and upgrades out of scope for the core (§1), so this
//! module implements just enough of the engine.io wire contract to host the
//! core over a real socket, without re-deriving every edge case of the v3/v4
//! engine.io protocol. Long-polling sessions are handled at handshake-only
//! fidelity; the WebSocket path is fully wired end to end.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use futures::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::EngineIoConfig;
use crate::handler::EngineIoHandler;
use crate::sid::Sid;
use crate::socket::{DisconnectReason, Frame, ProtocolVersion, Socket};

/// Registry of live sockets plus the handler and config they were created
/// with. Cheaply cloneable; every clone shares the same underlying state.
#[derive(Clone)]
pub struct EngineIoService<H: EngineIoHandler, S = ()> {
    inner: S,
    handler: Arc<H>,
    config: EngineIoConfig,
    sockets: Arc<RwLock<HashMap<Sid, Arc<Socket<H::Data>>>>>,
}

impl<H: EngineIoHandler> EngineIoService<H, ()> {
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, EngineIoConfig::default())
    }

    pub fn with_config(handler: H, config: EngineIoConfig) -> Self {
        Self {
            inner: (),
            handler: Arc::new(handler),
            config,
            sockets: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<H: EngineIoHandler, S> EngineIoService<H, S> {
    pub fn with_config_inner(inner: S, handler: H, config: EngineIoConfig) -> Self {
        Self {
            inner,
            handler: Arc::new(handler),
            config,
            sockets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Looks up a live socket by id, e.g. to route a polling `POST` body.
    pub fn get_socket(&self, sid: Sid) -> Option<Arc<Socket<H::Data>>> {
        self.sockets.read().unwrap().get(&sid).cloned()
    }

    fn matches_path(&self, req: &Request<hyper::Body>) -> bool {
        req.uri().path() == self.config.req_path
    }

    fn is_upgrade(req: &Request<hyper::Body>) -> bool {
        req.headers()
            .get(http::header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    fn negotiate_protocol(req_parts: &http::request::Parts) -> ProtocolVersion {
        req_parts
            .uri
            .query()
            .and_then(|q| {
                q.split('&')
                    .find_map(|kv| kv.strip_prefix("EIO=").map(|v| v == "4"))
            })
            .map(|is_v4| {
                if is_v4 {
                    ProtocolVersion::V4
                } else {
                    ProtocolVersion::V3
                }
            })
            .unwrap_or(ProtocolVersion::V4)
    }

    /// Registers a freshly-handshaken socket, fires `on_connect`, and
    /// starts its heartbeat watchdog. Returns the socket plus the receiving
    /// half of its outbound frame queue, which the caller is responsible
    /// for draining onto the real transport.
    fn register(&self, req_parts: http::request::Parts) -> (Arc<Socket<H::Data>>, mpsc::Receiver<Frame>) {
        let protocol = Self::negotiate_protocol(&req_parts);
        let (tx, rx) = mpsc::channel(self.config.max_buffer_size);
        let sid = Sid::new();
        let socket = Arc::new(Socket::new(sid, protocol, req_parts, H::Data::default(), tx));
        self.sockets.write().unwrap().insert(sid, socket.clone());
        self.handler.on_connect(socket.clone());
        self.spawn_heartbeat(socket.clone());
        (socket, rx)
    }

    fn spawn_heartbeat(&self, socket: Arc<Socket<H::Data>>) {
        let ping_timeout = self.config.ping_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ping_timeout) => {
                    socket.close(DisconnectReason::HeartbeatTimeout);
                }
                _ = socket.closed() => {}
            }
        });
    }

    fn remove(&self, sid: Sid) {
        self.sockets.write().unwrap().remove(&sid);
    }
}

impl<H: EngineIoHandler + Clone, S: Clone> tower::Service<Request<hyper::Body>>
    for EngineIoService<H, S>
where
    S: tower::Service<Request<hyper::Body>, Response = Response<hyper::Body>, Error = Infallible>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<hyper::Body>;
    type Error = Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Infallible>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<hyper::Body>) -> Self::Future {
        if !self.matches_path(&req) {
            return Box::pin(self.inner.call(req));
        }

        let this = self.clone();
        Box::pin(async move {
            if EngineIoService::<H, S>::is_upgrade(&req) {
                Ok(this.handle_upgrade(req))
            } else {
                Ok(this.handle_polling(req).await)
            }
        })
    }
}

impl<H: EngineIoHandler + Clone, S> EngineIoService<H, S> {
    /// Completes the WebSocket handshake and spawns the read/write pump
    /// that bridges `Socket::write` to the real transport.
    fn handle_upgrade(&self, req: Request<hyper::Body>) -> Response<hyper::Body> {
        let this = self.clone();
        let (mut parts, body) = req.into_parts();
        let req_for_upgrade = Request::from_parts(parts.clone(), body);
        parts.extensions.clear();

        let (socket, mut outbound) = this.register(parts);
        let sid = socket.id;

        tokio::spawn(async move {
            match hyper::upgrade::on(req_for_upgrade).await {
                Ok(upgraded) => {
                    let ws = tokio_tungstenite::WebSocketStream::from_raw_socket(
                        upgraded,
                        tokio_tungstenite::tungstenite::protocol::Role::Server,
                        None,
                    )
                    .await;
                    let (mut ws_tx, mut ws_rx) = ws.split();

                    let write_socket = socket.clone();
                    let writer = tokio::spawn(async move {
                        while let Some(frame) = outbound.recv().await {
                            let msg = match frame {
                                Frame::Text(t) => WsMessage::Text(t),
                                Frame::Binary(b) => WsMessage::Binary(b),
                            };
                            if ws_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        write_socket.close(DisconnectReason::TransportClose);
                    });

                    while let Some(msg) = ws_rx.next().await {
                        match msg {
                            Ok(WsMessage::Text(t)) => this.handler.on_message(t, socket.clone()),
                            Ok(WsMessage::Binary(b)) => this.handler.on_binary(b, socket.clone()),
                            Ok(WsMessage::Close(_)) | Err(_) => break,
                            _ => {}
                        }
                        if socket.is_closed() {
                            break;
                        }
                    }

                    writer.abort();
                    socket.close(DisconnectReason::TransportClose);
                    this.remove(sid);
                    this.handler
                        .on_disconnect(socket, DisconnectReason::TransportClose);
                }
                Err(e) => {
                    tracing::debug!("websocket upgrade failed for {sid}: {e}");
                    socket.close(DisconnectReason::TransportError);
                    this.remove(sid);
                }
            }
        });

        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(http::header::UPGRADE, "websocket")
            .header(http::header::CONNECTION, "Upgrade")
            .body(hyper::Body::empty())
            .unwrap()
    }

    /// Handshake-only long-polling support: a bare `GET` opens a session and
    /// returns the engine.io `OPEN` packet; a `POST` with `sid=` dispatches
    /// its body as one inbound frame. Session-spanning `GET` drains (the
    /// part of the protocol that turns polling into a real duplex channel)
    /// are out of scope per spec.md §1.
    async fn handle_polling(&self, req: Request<hyper::Body>) -> Response<hyper::Body> {
        let sid_param = req.uri().query().and_then(|q| {
            q.split('&')
                .find_map(|kv| kv.strip_prefix("sid=").map(|v| v.to_string()))
        });

        match (req.method().clone(), sid_param) {
            (http::Method::GET, None) => {
                let (parts, _) = req.into_parts();
                let (socket, outbound) = self.register(parts);
                let open = open_packet(socket.id, &self.config);
                // Nothing drains `outbound` for a polling session in this
                // glue-tier implementation; drop it so writes fail fast
                // with `Error::SocketClosed` instead of silently queueing.
                drop(outbound);
                Response::new(hyper::Body::from(open))
            }
            (http::Method::GET, Some(sid)) => match sid.parse::<Sid>().ok().and_then(|sid| self.get_socket(sid)) {
                Some(_) => Response::new(hyper::Body::empty()),
                None => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(hyper::Body::empty())
                    .unwrap(),
            },
            (http::Method::POST, Some(sid)) => {
                let Some(socket) = sid.parse::<Sid>().ok().and_then(|sid| self.get_socket(sid)) else {
                    return Response::builder()
                        .status(StatusCode::NOT_FOUND)
                        .body(hyper::Body::empty())
                        .unwrap();
                };
                let body = hyper::body::to_bytes(req.into_body())
                    .await
                    .unwrap_or_default();
                if let Ok(text) = String::from_utf8(body.to_vec()) {
                    self.handler.on_message(text, socket);
                }
                Response::new(hyper::Body::from("ok"))
            }
            _ => Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body(hyper::Body::empty())
                .unwrap(),
        }
    }
}

fn open_packet(sid: Sid, config: &EngineIoConfig) -> String {
    format!(
        "0{{\"sid\":\"{sid}\",\"upgrades\":[\"websocket\"],\"pingInterval\":{},\"pingTimeout\":{},\"maxPayload\":{}}}",
        config.ping_interval.as_millis(),
        config.ping_timeout.as_millis(),
        config.max_payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_packet_contains_sid() {
        let sid = Sid::new();
        let config = EngineIoConfig::default();
        let payload = open_packet(sid, &config);
        assert!(payload.contains(&sid.to_string()));
        assert!(payload.starts_with('0'));
    }
}
