mod gateway;
mod history;
mod presence;
mod protocol;
mod store;
mod support;
mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use gateway::{Gateway, GatewayOptions, SenderPolicy, Session, SessionState};
pub use presence::{ConnectionHandle, PresenceRegistry};
pub use protocol::{ClientEvent, MessageError, PrivateMessage, ServerEvent};
pub use store::{Conversation, Message, MessageStore};
pub use support::SupportContact;
pub use ws::PingInterval;

pub type UserId = i64;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("announce an identity before sending")]
    NotAnnounced,
    #[error("connection is closed")]
    Closed,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        use ChatError::*;
        match self {
            Validation(_) => "validation",
            NotAnnounced => "not_announced",
            Closed => "closed",
            Storage(_) => "storage",
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/socket", get(ws::chat_ws))
        .route("/api/chat/admin", get(history::admin_contact))
        .route("/api/chat/admin/refresh", post(history::refresh_admin_contact))
        .route("/api/chat/users", get(history::conversations))
        .route("/api/chat/history/{user_id}", get(history::history))
}
