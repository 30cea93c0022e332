use std::{net::SocketAddr, num::NonZeroU64, str::FromStr, time::Duration};

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::CorsLayer;

use crate::chat::{GatewayOptions, SenderPolicy};

const DEFAULT_PING_SECS: NonZeroU64 = NonZeroU64::new(30).unwrap();

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub cors_origin: String,
    pub sender_policy: SenderPolicy,
    pub max_message_len: usize,
    pub ws_ping_interval: Duration,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| dotenv::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        Ok(Config {
            bind_address: parsed(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://whispers.db?mode=rwc".to_owned()),
            db_max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 16)?,
            jwt_secret,
            cors_origin: lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:6678".to_owned()),
            sender_policy: parsed(&lookup, "CHAT_SENDER_POLICY", SenderPolicy::default())?,
            max_message_len: parsed(&lookup, "MAX_MESSAGE_LEN", 4000)?,
            ws_ping_interval: Duration::from_secs(
                parsed(&lookup, "WS_PING_INTERVAL_SECS", DEFAULT_PING_SECS)?.get(),
            ),
            log_json: parsed(&lookup, "LOG_JSON", false)?,
        })
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            sender_policy: self.sender_policy,
            max_message_len: self.max_message_len,
        }
    }

    pub fn cors_layer(&self) -> Result<CorsLayer, ConfigError> {
        let origin = HeaderValue::from_str(&self.cors_origin).map_err(|_| ConfigError::Invalid {
            name: "CORS_ORIGIN",
            value: self.cors_origin.clone(),
        })?;

        Ok(CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true))
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}
