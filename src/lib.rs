pub mod appresult;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod users;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub use appresult::{AppError, AppResult, Envelope};

use auth::JwtKeys;
use chat::{Gateway, MessageStore, PingInterval, PresenceRegistry, SupportContact};
use config::Config;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub gateway: Gateway,
    pub support: SupportContact,
    pub jwt: JwtKeys,
    pub ping_interval: PingInterval,
}

impl AppState {
    /// Wires the chat components on top of an already migrated pool.
    ///
    /// The support contact is looked up here, once; see [`SupportContact`].
    pub async fn build(db_pool: SqlitePool, config: &Config) -> Self {
        let gateway = Gateway::new(
            MessageStore::new(db_pool.clone()),
            Arc::new(PresenceRegistry::new()),
            config.gateway_options(),
        );
        let support = SupportContact::resolve(&db_pool).await;

        AppState {
            db_pool,
            gateway,
            support,
            jwt: JwtKeys::new(config.jwt_secret.as_bytes()),
            ping_interval: PingInterval(config.ws_ping_interval),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(chat::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}
