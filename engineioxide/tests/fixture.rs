use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use engineioxide::{config::EngineIoConfig, handler::EngineIoHandler, service::EngineIoService};
use hyper::{Body, Client, Request};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// An OpenPacket is used to initiate a connection.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

/// `params` should be in the form of `key1=value1&key2=value2`.
pub async fn send_req(
    port: u16,
    params: String,
    method: http::Method,
    body: Option<String>,
) -> String {
    let body = match body {
        Some(b) => Body::from(b),
        None => Body::empty(),
    };

    let req = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1:{port}/engine.io/?EIO=4&{params}"))
        .body(body)
        .unwrap();
    let res = Client::new().request(req).await.unwrap();
    let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .chars()
        .skip(1)
        .collect()
}

pub async fn create_polling_connection(port: u16) -> String {
    let body = send_req(port, "transport=polling".to_string(), http::Method::GET, None).await;
    let open_packet: OpenPacket = serde_json::from_str(&body).unwrap();
    open_packet.sid
}

pub async fn create_ws_connection(
    port: u16,
) -> WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>> {
    tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/engine.io/?EIO=4&transport=websocket"
    ))
    .await
    .unwrap()
    .0
}

pub fn create_server<H: EngineIoHandler + Clone>(handler: H, port: u16) {
    let config = EngineIoConfig::builder()
        .ping_interval(Duration::from_millis(300))
        .ping_timeout(Duration::from_millis(200))
        .max_payload(1_000_000)
        .build();

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let svc = EngineIoService::with_config(handler, config);

    tokio::spawn(async move {
        let make_svc = hyper::service::make_service_fn(move |_conn| {
            let svc = svc.clone();
            async move { Ok::<_, std::convert::Infallible>(svc) }
        });
        hyper::Server::bind(&addr).serve(make_svc).await.unwrap();
    });
}
