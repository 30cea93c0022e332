use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use super::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    // never set by this service
    pub is_read: bool,
}

/// A counterpart of some user, together with the latest message exchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub partner_id: UserId,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub last_message_id: i64,
    pub last_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_time: OffsetDateTime,
}

/// Append-only log of private messages. Ids and timestamps come from the
/// database, which makes it the ordering authority.
#[derive(Debug, Clone)]
pub struct MessageStore {
    db_pool: SqlitePool,
}

impl MessageStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        MessageStore { db_pool }
    }

    /// Not idempotent: every successful call stores one more message.
    pub async fn append(&self, sender_id: UserId, receiver_id: UserId, content: &str) -> Result<Message, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO messages (sender_id,receiver_id,content) VALUES (?,?,?) \
             RETURNING id,sender_id,receiver_id,content,created_at,is_read",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .fetch_one(&self.db_pool)
        .await
    }

    /// Both directions of the conversation, oldest first.
    pub async fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id,sender_id,receiver_id,content,created_at,is_read FROM messages \
             WHERE (sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?) \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .fetch_all(&self.db_pool)
        .await
    }

    /// One entry per counterpart of `user_id`, most recently active first.
    pub async fn conversation_partners(&self, user_id: UserId) -> Result<Vec<Conversation>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT latest.partner_id, u.nickname, u.avatar,
                      m.id AS last_message_id, m.content AS last_message, m.created_at AS last_message_time
               FROM (
                   SELECT CASE WHEN sender_id=? THEN receiver_id ELSE sender_id END AS partner_id,
                          MAX(id) AS max_id
                   FROM messages
                   WHERE sender_id=? OR receiver_id=?
                   GROUP BY partner_id
               ) latest
               JOIN messages m ON m.id=latest.max_id
               LEFT JOIN users u ON u.id=latest.partner_id
               ORDER BY m.created_at DESC, m.id DESC"#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await
    }
}
