use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{auth::Role, chat::UserId};

/// Display data for a user, as shown next to chat messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: UserId,
    pub nickname: String,
    pub avatar: Option<String>,
}

pub async fn create_user(
    db_pool: &SqlitePool,
    nickname: &str,
    avatar: Option<&str>,
    role: Role,
) -> Result<UserId, sqlx::Error> {
    let user_id = sqlx::query("INSERT INTO users (nickname,avatar,role) VALUES (?,?,?)")
        .bind(nickname)
        .bind(avatar)
        .bind(role.as_str())
        .execute(db_pool)
        .await?
        .last_insert_rowid();

    tracing::info!(user_id, %role, nickname, "user created");
    Ok(user_id)
}

pub async fn profile(db_pool: &SqlitePool, user_id: UserId) -> Result<Option<UserProfile>, sqlx::Error> {
    sqlx::query_as("SELECT id,nickname,avatar FROM users WHERE id=?")
        .bind(user_id)
        .fetch_optional(db_pool)
        .await
}

/// The admin with the lowest id, if any admin exists.
pub async fn first_admin(db_pool: &SqlitePool) -> Result<Option<UserId>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM users WHERE role='admin' ORDER BY id LIMIT 1")
        .fetch_optional(db_pool)
        .await
}
