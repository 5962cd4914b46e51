mod fixture;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use engineioxide::handler::EngineIoHandler;
use engineioxide::socket::{DisconnectReason, Socket};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Default)]
struct EchoHandler {
    connects: Arc<AtomicUsize>,
}

impl EngineIoHandler for EchoHandler {
    type Data = ();

    fn on_connect(&self, _socket: Arc<Socket<()>>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, _socket: Arc<Socket<()>>, _reason: DisconnectReason) {}

    fn on_message(&self, msg: String, socket: Arc<Socket<()>>) {
        socket.emit(msg).ok();
    }

    fn on_binary(&self, data: Vec<u8>, socket: Arc<Socket<()>>) {
        socket.emit_binary(data).ok();
    }
}

#[tokio::test]
async fn websocket_round_trip_echoes_text() {
    let handler = EchoHandler::default();
    fixture::create_server(handler.clone(), 3101);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut ws = fixture::create_ws_connection(3101).await;
    ws.send(Message::Text("hello".into())).await.unwrap();

    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("hello".into()));
    assert!(handler.connects.load(Ordering::SeqCst) >= 1);
}
