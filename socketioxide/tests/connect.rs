mod fixture;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use socketioxide::{Ack, LocalAdapter, Socket, SocketIo};
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn explicit_connect_admits_to_default_namespace_and_acks() {
    let (layer, _io) = SocketIo::<LocalAdapter>::builder()
        .connect_timeout(Duration::from_millis(500))
        .build(|_socket: Arc<Socket<LocalAdapter>>, _auth: Value| async {});
    fixture::spawn_server(layer, 3201);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = fixture::create_ws_connection(3201).await;
    ws.send(Message::Text("0".to_string())).await.unwrap();

    let reply = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text frame, got {reply:?}")
    };
    assert!(text.starts_with('0'));
    assert!(text.contains("\"sid\""));
}

#[tokio::test]
async fn event_with_ack_id_gets_an_ack_packet_back() {
    let (layer, _io) = SocketIo::<LocalAdapter>::builder()
        .connect_timeout(Duration::from_millis(500))
        .build(|socket: Arc<Socket<LocalAdapter>>, _auth: Value| async move {
            socket.on("echo", |_s, data: Value, _bin| async move { Ok(Ack::Data(data)) });
        });
    fixture::spawn_server(layer, 3202);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = fixture::create_ws_connection(3202).await;
    ws.send(Message::Text("0".to_string())).await.unwrap();
    ws.next().await.unwrap().unwrap(); // the CONNECT acknowledgement

    ws.send(Message::Text(r#"20["echo","hi"]"#.to_string()))
        .await
        .unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text frame, got {reply:?}")
    };
    assert_eq!(text, "30\"hi\"");
}

#[tokio::test]
async fn connect_to_an_unregistered_namespace_gets_a_connect_error() {
    let (layer, _io) = SocketIo::<LocalAdapter>::builder()
        .connect_timeout(Duration::from_millis(500))
        .build(|_socket: Arc<Socket<LocalAdapter>>, _auth: Value| async {});
    fixture::spawn_server(layer, 3203);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = fixture::create_ws_connection(3203).await;
    ws.send(Message::Text("0/admin,".to_string())).await.unwrap();

    let reply = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text frame, got {reply:?}")
    };
    assert!(text.starts_with('4'), "expected a CONNECT_ERROR packet, got {text}");
    assert!(text.contains("Invalid namespace"));
}
