//! JSON frames exchanged over the chat socket: `{"event": ..., "data": ...}`.

use serde::{Deserialize, Deserializer, Serialize};

use super::{ChatError, Message, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserOnline(#[serde(deserialize_with = "user_id")] UserId),
    PrivateMessage(PrivateMessage),
}

/// Every field is optional on the wire so that a missing one surfaces as a
/// validation error instead of a silently dropped frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PrivateMessage {
    #[serde(default, deserialize_with = "optional_user_id")]
    pub sender_id: Option<UserId>,
    #[serde(default, deserialize_with = "optional_user_id")]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    MessageError(MessageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub kind: String,
    pub message: String,
}

impl From<&ChatError> for MessageError {
    fn from(err: &ChatError) -> Self {
        let message = match err {
            ChatError::Storage(_) => "message could not be saved".to_owned(),
            other => other.to_string(),
        };
        MessageError {
            kind: err.kind().to_owned(),
            message,
        }
    }
}

pub fn decode(frame: &[u8]) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_slice(frame)
}

// browsers send ids either as numbers or as the strings they came from
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(UserId),
    Text(String),
}

fn user_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UserId, D::Error> {
    match IdRepr::deserialize(deserializer)? {
        IdRepr::Number(id) => Ok(id),
        IdRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid user id {text:?}"))),
    }
}

fn optional_user_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UserId>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "user_id")] UserId);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(id)| id))
}
