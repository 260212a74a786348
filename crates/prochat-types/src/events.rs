use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::MessageView;

/// Events sent FROM client TO server over the realtime socket.
///
/// Frames look like `{"event": "sendMessage", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Put this connection in the room named after the user id
    Join(Uuid),

    /// Persist a direct message and deliver it
    SendMessage(SendMessagePayload),

    /// Typing indicator for a conversation
    Typing(TypingPayload),

    /// Announce that a user came online
    UserOnline(Uuid),

    /// Announce that a user went offline
    UserOffline(Uuid),
}

impl ClientEvent {
    /// The `event` tag of a raw frame, for frames that did not decode.
    pub fn tag_of(frame: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(frame).ok()?;
        value.get("event")?.as_str().map(str::to_string)
    }
}

/// Fields are optional so a missing one can be answered with `messageError`.
/// A field of the wrong shape (`""` for an id, a number for text) reads as
/// missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, deserialize_with = "lenient")]
    pub sender_id: Option<Uuid>,
    #[serde(default, deserialize_with = "lenient")]
    pub recipient_id: Option<Uuid>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

impl SendMessagePayload {
    /// Returns (sender, recipient, trimmed text) when every field is present
    /// and the text is not blank.
    pub fn validate(&self) -> Option<(Uuid, Uuid, String)> {
        let text = self.text.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        Some((self.sender_id?, self.recipient_id?, text.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub user_id: Option<Uuid>,
    #[serde(default, deserialize_with = "lenient")]
    pub recipient_id: Option<Uuid>,
    #[serde(default)]
    pub is_typing: bool,
}

/// Any JSON value; `None` unless it decodes as `T`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message was stored; delivered to the sender and the recipient's room
    NewMessage(MessageView),

    /// Sending failed; delivered to the originating connection only
    MessageError { error: String },

    /// Someone is (or stopped) typing to the receiving user
    #[serde(rename_all = "camelCase")]
    UserTyping { user_id: Uuid, is_typing: bool },

    /// A user came online or went offline
    #[serde(rename_all = "camelCase")]
    UserStatus { user_id: Uuid, status: PresenceStatus },
}

impl ServerEvent {
    pub fn message_error(error: impl Into<String>) -> Self {
        Self::MessageError {
            error: error.into(),
        }
    }
}
