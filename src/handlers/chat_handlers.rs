//! Websocket bridge into the chat relay.
//!
//! Each socket becomes one relay connection: inbound text frames are decoded
//! as `ClientEvent`s, and everything the relay queues for the connection is
//! written back as JSON text frames by a dedicated writer task.

use crate::{models::chat::ClientEvent, services::chat_relay::ChatRelay, state::AppState};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

/// `GET /socket`
pub async fn chat_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, state.chat))
}

async fn serve_connection(socket: WebSocket, relay: ChatRelay) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut events) = relay.connect().await;

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!("could not encode chat event: {}", err);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Ends on a close frame, a transport error, or when the relay drops
    // the connection and the writer runs dry.
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => relay.handle(conn, event).await,
                        Err(err) => relay.reject(conn, "unknown", err.to_string()).await,
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("socket {} errored: {}", conn, err);
                    break;
                }
            },
            _ = &mut writer => {
                debug!("socket {} writer finished", conn);
                break;
            }
        }
    }

    relay.disconnect(conn).await;
    writer.abort();
}
