//! Chat rooms, messages and the websocket event envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form identity fields a user supplies when joining (name, class, ...).
pub type UserInfo = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Admin,
}

/// One entry of a room transcript. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub sender: Sender,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A conversation bound to one end-user identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub room_id: String,
    #[serde(default)]
    pub info: UserInfo,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatRoom {
    pub fn new(room_id: impl Into<String>, info: UserInfo) -> Self {
        Self {
            room_id: room_id.into(),
            info,
            messages: Vec::new(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.room_id.clone(),
            info: self.info.clone(),
            last_message: self.messages.last().cloned(),
        }
    }

    /// The `(name, class)` pair used to recognise a returning user.
    pub fn identity(&self) -> Option<(&str, &str)> {
        identity_pair(&self.info)
    }
}

/// Entry of the admin's room list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub info: UserInfo,
    pub last_message: Option<ChatMessage>,
}

/// Both `name` and `class` must be present, non-empty strings.
pub fn identity_pair(info: &UserInfo) -> Option<(&str, &str)> {
    let name = info.get("name").and_then(Value::as_str)?;
    let class = info.get("class").and_then(Value::as_str)?;
    if name.is_empty() || class.is_empty() {
        return None;
    }
    Some((name, class))
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoin {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub user_info: UserInfo,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub message: String,
    pub sender: Sender,
}

/// Frames a client sends: `{"event": "...", "data": ...}`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    AdminJoin,
    UserJoin(UserJoin),
    AdminFetchHistory(String),
    SendMessage(SendMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::AdminJoin => "admin_join",
            ClientEvent::UserJoin(_) => "user_join",
            ClientEvent::AdminFetchHistory(_) => "admin_fetch_history",
            ClientEvent::SendMessage(_) => "send_message",
        }
    }
}

/// Frames the relay pushes to a connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserList(Vec<RoomSummary>),
    ChatHistory(Vec<ChatMessage>),
    #[serde(rename = "chat_roomId")]
    ChatRoomId(String),
    ReceiveMessage(ChatMessage),
    Error(Rejection),
}

/// Explicit "not delivered" answer to a client event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Rejection {
    pub event: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_client_frames() {
        let join: ClientEvent = serde_json::from_value(json!({"event": "admin_join"})).unwrap();
        assert_eq!(join, ClientEvent::AdminJoin);

        let fetch: ClientEvent =
            serde_json::from_value(json!({"event": "admin_fetch_history", "data": "u1"})).unwrap();
        assert_eq!(fetch, ClientEvent::AdminFetchHistory("u1".into()));

        let send: ClientEvent = serde_json::from_value(json!({
            "event": "send_message",
            "data": {"roomId": "u1", "message": "hi", "sender": "user"}
        }))
        .unwrap();
        assert_eq!(send.name(), "send_message");
    }

    #[test]
    fn encodes_server_frames_with_wire_names() {
        let frame = serde_json::to_value(ServerEvent::ChatRoomId("u1".into())).unwrap();
        assert_eq!(frame, json!({"event": "chat_roomId", "data": "u1"}));

        let room = ChatRoom::new("u1", Map::new());
        let frame = serde_json::to_value(ServerEvent::UserList(vec![room.summary()])).unwrap();
        assert_eq!(
            frame,
            json!({"event": "user_list", "data": [{"id": "u1", "info": {}, "lastMessage": null}]})
        );
    }

    #[test]
    fn identity_needs_both_fields() {
        let full = json!({"name": "Anna", "class": "10A"}).as_object().cloned().unwrap();
        let partial = json!({"name": "Anna"}).as_object().cloned().unwrap();
        assert_eq!(identity_pair(&full), Some(("Anna", "10A")));
        assert_eq!(identity_pair(&partial), None);
    }
}
