use anyhow::anyhow;
use axum::{debug_handler, extract::{Path, State}};
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    users::{self, UserProfile},
    AppError, AppResult, AppState, Envelope,
};

use super::{Conversation, Gateway, Message, SupportContact, UserId};

#[debug_handler(state = AppState)]
pub(crate) async fn admin_contact(
    _user: AuthUser,
    State(support): State<SupportContact>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Envelope<UserProfile>> {
    let Some(admin_id) = support.admin_id() else {
        return Err(AppError::NotFound("no support contact available".into()));
    };

    let profile = users::profile(&db_pool, admin_id)
        .await?
        .ok_or_else(|| anyhow!("support admin {admin_id} no longer exists"))?;

    Ok(Envelope::ok(profile))
}

#[debug_handler(state = AppState)]
pub(crate) async fn refresh_admin_contact(
    user: AuthUser,
    State(support): State<SupportContact>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Envelope<Option<UserId>>> {
    user.require_admin()?;
    Ok(Envelope::ok(support.refresh(&db_pool).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn conversations(
    user: AuthUser,
    State(gateway): State<Gateway>,
) -> AppResult<Envelope<Vec<Conversation>>> {
    Ok(Envelope::ok(gateway.store().conversation_partners(user.id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    user: AuthUser,
    State(gateway): State<Gateway>,
    Path(other): Path<String>,
) -> AppResult<Envelope<Vec<Message>>> {
    let other: UserId = other
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid user id {other:?}")))?;

    Ok(Envelope::ok(gateway.store().history(user.id, other).await?))
}
