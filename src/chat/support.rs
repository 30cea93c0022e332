use std::sync::{Arc, PoisonError, RwLock};

use sqlx::SqlitePool;

use crate::users;

use super::UserId;

/// The admin users are pointed at when they open the support chat.
///
/// Looked up once at startup and kept for the life of the process; admins
/// created later stay invisible until [`SupportContact::refresh`] runs.
#[derive(Debug, Clone, Default)]
pub struct SupportContact {
    admin_id: Arc<RwLock<Option<UserId>>>,
}

impl SupportContact {
    /// Never fails: a lookup error leaves the contact empty.
    pub async fn resolve(db_pool: &SqlitePool) -> Self {
        let contact = SupportContact::default();
        if let Err(err) = contact.refresh(db_pool).await {
            tracing::error!(error = %err, "could not look up the support admin");
        }
        contact
    }

    pub fn admin_id(&self) -> Option<UserId> {
        *self.admin_id.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn refresh(&self, db_pool: &SqlitePool) -> Result<Option<UserId>, sqlx::Error> {
        let found = users::first_admin(db_pool).await?;
        *self.admin_id.write().unwrap_or_else(PoisonError::into_inner) = found;

        match found {
            Some(admin_id) => tracing::info!(admin_id, "support admin found"),
            None => tracing::warn!("no admin user found, support chat unavailable"),
        }
        Ok(found)
    }
}
