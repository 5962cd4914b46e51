//! Shared scaffolding for the wire-level tests in this directory, mirroring
//! `engineioxide`'s own `tests/fixture.rs`: a real hyper server mounting a
//! [`SocketIoLayer`] and a raw WebSocket client driving it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socketioxide::{LocalAdapter, SocketIoLayer};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::Layer;

pub async fn create_ws_connection(
    port: u16,
) -> WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>> {
    tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/socket.io/?EIO=4&transport=websocket"
    ))
    .await
    .unwrap()
    .0
}

pub fn spawn_server(layer: SocketIoLayer<LocalAdapter>, port: u16) {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let inner = tower::service_fn(|_req: http::Request<hyper::Body>| async {
        Ok::<_, std::convert::Infallible>(http::Response::new(hyper::Body::empty()))
    });
    let svc = layer.layer(inner);

    tokio::spawn(async move {
        let make_svc = hyper::service::make_service_fn(move |_conn| {
            let svc = svc.clone();
            async move { Ok::<_, std::convert::Infallible>(svc) }
        });
        hyper::Server::bind(&addr).serve(make_svc).await.unwrap();
    });
}
