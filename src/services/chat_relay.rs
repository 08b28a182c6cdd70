//! ChatRelay: routes messages between user rooms and the single admin slot.
//!
//! All relay state (rooms, live connections, the admin slot) sits behind one
//! async mutex. Every mutation persists the whole room list while that mutex
//! is held, and broadcasts happen under the same scope, so subscribers of a
//! room observe its messages in append order.

use crate::{
    models::chat::{
        ChatMessage, ChatRoom, ClientEvent, Rejection, RoomSummary, SendMessage, Sender,
        ServerEvent, UserJoin, identity_pair,
    },
    services::json_store::{JsonStore, StoreError},
};
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Table holding every room with its transcript.
pub const CHATS_TABLE: &str = "chats";

pub type ConnectionId = Uuid;

/// Events queued per connection before it counts as not reading and is
/// dropped.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("roomId is required")]
    EmptyRoomId,
    #[error("message is empty")]
    EmptyMessage,
    #[error("room `{0}` does not exist")]
    RoomNotFound(String),
    #[error("connection is not registered")]
    UnknownConnection,
    #[error("could not persist chats: {0}")]
    Store(#[from] StoreError),
}

struct Connection {
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RelayState {
    rooms: Vec<ChatRoom>,
    connections: HashMap<ConnectionId, Connection>,
    admin: Option<ConnectionId>,
}

impl RelayState {
    fn room(&self, room_id: &str) -> Option<&ChatRoom> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    fn room_index(&self, room_id: &str) -> Option<usize> {
        self.rooms.iter().position(|r| r.room_id == room_id)
    }

    fn summaries(&self) -> Vec<RoomSummary> {
        self.rooms.iter().map(ChatRoom::summary).collect()
    }

    /// Queue an event for one connection. A connection whose queue is full
    /// or whose receiver is gone is dropped from the relay.
    fn send_to(&mut self, conn: ConnectionId, event: ServerEvent) {
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        match connection.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("connection {} is not reading, dropping it", conn);
                self.drop_connection(conn);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("connection {} is gone, dropping it", conn);
                self.drop_connection(conn);
            }
        }
    }

    fn broadcast_room(&mut self, room_id: &str, event: &ServerEvent) {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.rooms.contains(room_id))
            .map(|(id, _)| *id)
            .collect();
        for id in targets {
            self.send_to(id, event.clone());
        }
    }

    fn push_user_list(&mut self) {
        if let Some(admin) = self.admin {
            let summaries = self.summaries();
            self.send_to(admin, ServerEvent::UserList(summaries));
        }
    }

    /// Forget a connection, freeing the admin slot if it held it.
    fn drop_connection(&mut self, conn: ConnectionId) -> bool {
        self.connections.remove(&conn);
        if self.admin == Some(conn) {
            self.admin = None;
            true
        } else {
            false
        }
    }

    fn subscribe(&mut self, conn: ConnectionId, room_id: &str) -> Result<(), RelayError> {
        let connection = self
            .connections
            .get_mut(&conn)
            .ok_or(RelayError::UnknownConnection)?;
        connection.rooms.insert(room_id.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct ChatRelay {
    state: Arc<Mutex<RelayState>>,
    store: JsonStore,
}

impl ChatRelay {
    /// Load persisted rooms and start with no live connections.
    pub async fn load(store: JsonStore) -> Result<Self, RelayError> {
        let rooms: Vec<ChatRoom> = store.load(CHATS_TABLE).await?;
        info!("chat relay loaded {} rooms", rooms.len());
        Ok(Self {
            state: Arc::new(Mutex::new(RelayState {
                rooms,
                ..Default::default()
            })),
            store,
        })
    }

    /// Register a new transport connection. Events for it arrive on the
    /// returned receiver until [`disconnect`](ChatRelay::disconnect).
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = Uuid::new_v4();
        self.state.lock().await.connections.insert(
            id,
            Connection {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!("chat connection {} opened", id);
        (id, rx)
    }

    /// Forget a connection. If it held the admin slot, the slot is freed.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut state = self.state.lock().await;
        if state.drop_connection(conn) {
            info!("admin {} disconnected", conn);
        } else {
            debug!("chat connection {} closed", conn);
        }
    }

    /// Dispatch one client event. Failures are answered with an `error`
    /// event on the same connection.
    pub async fn handle(&self, conn: ConnectionId, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::AdminJoin => self.admin_join(conn).await,
            ClientEvent::UserJoin(join) => self.user_join(conn, join).await.map(|_| ()),
            ClientEvent::AdminFetchHistory(room_id) => {
                self.admin_fetch_history(conn, &room_id).await
            }
            ClientEvent::SendMessage(send) => self.send_message(conn, send).await.map(|_| ()),
        };
        if let Err(err) = result {
            self.reject(conn, name, err.to_string()).await;
        }
    }

    /// Answer a connection with an explicit rejection.
    pub async fn reject(&self, conn: ConnectionId, event: &str, reason: String) {
        warn!("rejected {} from {}: {}", event, conn, reason);
        self.state.lock().await.send_to(
            conn,
            ServerEvent::Error(Rejection {
                event: event.to_string(),
                reason,
            }),
        );
    }

    /// Claim the admin slot, silently replacing any previous admin, and
    /// reply with the full room list.
    pub async fn admin_join(&self, conn: ConnectionId) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if !state.connections.contains_key(&conn) {
            return Err(RelayError::UnknownConnection);
        }
        if let Some(previous) = state.admin.replace(conn) {
            if previous != conn {
                if let Some(old) = state.connections.get_mut(&previous) {
                    old.rooms.clear();
                }
                info!("admin {} superseded by {}", previous, conn);
            }
        }
        info!("admin joined: {}", conn);
        let summaries = state.summaries();
        state.send_to(conn, ServerEvent::UserList(summaries));
        Ok(())
    }

    /// Bind a connection to a room, creating the room if needed.
    ///
    /// Resolution order: an existing room with the given id, then an
    /// existing room whose `(name, class)` matches the supplied info, then a
    /// new room. An empty id is only accepted when the identity pair is
    /// present; a new room then gets a generated id.
    pub async fn user_join(&self, conn: ConnectionId, join: UserJoin) -> Result<String, RelayError> {
        let requested = join
            .room_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let identity = identity_pair(&join.user_info);
        if requested.is_none() && identity.is_none() {
            return Err(RelayError::EmptyRoomId);
        }

        let mut state = self.state.lock().await;
        if !state.connections.contains_key(&conn) {
            return Err(RelayError::UnknownConnection);
        }

        let existing = requested
            .and_then(|id| state.room_index(id))
            .or_else(|| {
                let (name, class) = identity?;
                state
                    .rooms
                    .iter()
                    .position(|room| room.identity() == Some((name, class)))
            });

        let (index, previous) = match existing {
            Some(index) => {
                let previous = std::mem::replace(
                    &mut state.rooms[index].info,
                    join.user_info.clone(),
                );
                (index, Some(previous))
            }
            None => {
                let room_id = requested
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
                state.rooms.push(ChatRoom::new(room_id, join.user_info.clone()));
                (state.rooms.len() - 1, None)
            }
        };

        if let Err(err) = self.store.save(CHATS_TABLE, &state.rooms).await {
            match previous {
                Some(info) => state.rooms[index].info = info,
                None => {
                    state.rooms.pop();
                }
            }
            return Err(err.into());
        }

        let room_id = state.rooms[index].room_id.clone();
        state.subscribe(conn, &room_id)?;
        let history = state.rooms[index].messages.clone();
        state.send_to(conn, ServerEvent::ChatHistory(history));
        state.send_to(conn, ServerEvent::ChatRoomId(room_id.clone()));
        state.push_user_list();

        let name = join
            .user_info
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("anonymous");
        info!("user {} joined room {}", name, room_id);
        Ok(room_id)
    }

    /// Subscribe the caller to a room and send it the transcript.
    /// Unknown rooms are a no-op.
    pub async fn admin_fetch_history(
        &self,
        conn: ConnectionId,
        room_id: &str,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let Some(messages) = state.room(room_id).map(|r| r.messages.clone()) else {
            debug!("history requested for unknown room {}", room_id);
            return Ok(());
        };
        state.subscribe(conn, room_id)?;
        state.send_to(conn, ServerEvent::ChatHistory(messages));
        Ok(())
    }

    /// Append a message to a room's transcript and fan it out.
    ///
    /// Subscribers of the room receive it; a user message also reaches the
    /// admin when the admin is not watching that room. The admin's room
    /// list is refreshed afterwards.
    pub async fn send_message(
        &self,
        conn: ConnectionId,
        send: SendMessage,
    ) -> Result<ChatMessage, RelayError> {
        let room_id = send.room_id.trim();
        if room_id.is_empty() {
            return Err(RelayError::EmptyRoomId);
        }
        if send.message.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let mut state = self.state.lock().await;
        let index = state
            .room_index(room_id)
            .ok_or_else(|| RelayError::RoomNotFound(room_id.to_string()))?;

        let message = ChatMessage {
            room_id: room_id.to_string(),
            sender: send.sender,
            message: send.message,
            timestamp: Utc::now(),
        };
        state.rooms[index].messages.push(message.clone());
        if let Err(err) = self.store.save(CHATS_TABLE, &state.rooms).await {
            state.rooms[index].messages.pop();
            return Err(err.into());
        }

        let event = ServerEvent::ReceiveMessage(message.clone());
        state.broadcast_room(room_id, &event);
        if message.sender == Sender::User {
            if let Some(admin) = state.admin {
                let watching = state
                    .connections
                    .get(&admin)
                    .is_some_and(|c| c.rooms.contains(room_id));
                if !watching {
                    state.send_to(admin, event);
                }
            }
        }
        state.push_user_list();
        debug!("message from {} appended to room {}", conn, room_id);
        Ok(message)
    }

    /// Snapshot of one room's transcript.
    pub async fn history(&self, room_id: &str) -> Option<Vec<ChatMessage>> {
        self.state
            .lock()
            .await
            .room(room_id)
            .map(|r| r.messages.clone())
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn admin_connected(&self) -> bool {
        self.state.lock().await.admin.is_some()
    }
}
