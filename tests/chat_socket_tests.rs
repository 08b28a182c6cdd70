//! Websocket tests against a served router on an ephemeral port.

mod common;

use common::TestServer;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::{net::SocketAddr, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(server: &TestServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/socket")).await.unwrap();
    socket
}

async fn emit(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON event, skipping control frames.
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Poll until `check` holds; relay cleanup runs after the socket closes.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn malformed_frame_is_answered_and_socket_stays_open() {
    let server = TestServer::new().await;
    let addr = serve(&server).await;
    let mut socket = connect(addr).await;

    socket.send(Message::Text("not json".into())).await.unwrap();
    let event = next_event(&mut socket).await;
    assert_eq!(event["event"], "error");
    assert_eq!(event["data"]["event"], "unknown");

    emit(
        &mut socket,
        json!({"event": "user_join", "data": {"roomId": "u1", "userInfo": {"name": "Bao"}}}),
    )
    .await;
    let history = next_event(&mut socket).await;
    assert_eq!(history, json!({"event": "chat_history", "data": []}));
    let room = next_event(&mut socket).await;
    assert_eq!(room, json!({"event": "chat_roomId", "data": "u1"}));
}

#[tokio::test]
async fn user_message_reaches_the_admin() {
    let server = TestServer::new().await;
    let addr = serve(&server).await;
    let mut user = connect(addr).await;
    let mut admin = connect(addr).await;

    emit(
        &mut user,
        json!({"event": "user_join", "data": {"roomId": "u1", "userInfo": {"name": "Bao", "class": "11B"}}}),
    )
    .await;
    next_event(&mut user).await;
    next_event(&mut user).await;

    emit(&mut admin, json!({"event": "admin_join"})).await;
    let list = next_event(&mut admin).await;
    assert_eq!(list["event"], "user_list");
    assert_eq!(list["data"][0]["id"], "u1");

    emit(
        &mut user,
        json!({"event": "send_message", "data": {"roomId": "u1", "message": "hello", "sender": "user"}}),
    )
    .await;
    let echoed = next_event(&mut user).await;
    assert_eq!(echoed["event"], "receive_message");

    let pushed = next_event(&mut admin).await;
    assert_eq!(pushed["event"], "receive_message");
    assert_eq!(pushed["data"]["message"], "hello");
    assert_eq!(pushed["data"]["roomId"], "u1");
    let refreshed = next_event(&mut admin).await;
    assert_eq!(refreshed["event"], "user_list");
    assert_eq!(refreshed["data"][0]["lastMessage"]["message"], "hello");
}

#[tokio::test]
async fn closing_the_admin_socket_frees_the_slot() {
    let server = TestServer::new().await;
    let addr = serve(&server).await;
    let relay = server.state.chat.clone();

    let mut admin = connect(addr).await;
    emit(&mut admin, json!({"event": "admin_join"})).await;
    assert_eq!(next_event(&mut admin).await["event"], "user_list");
    assert!(relay.admin_connected().await);

    admin.close(None).await.unwrap();

    eventually(|| {
        let relay = relay.clone();
        async move { !relay.admin_connected().await && relay.connection_count().await == 0 }
    })
    .await;
}
