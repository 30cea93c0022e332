use std::fmt;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::chat::UserId;

use super::Role;

/// Token payload, as issued by the login service: `{id, role, iat, exp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub id: UserId,
    pub role: Role,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

/// HS256 keys derived from the secret shared with the login service.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("JwtKeys(..)")
    }
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        JwtKeys {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Signs a token for `id`; login lives elsewhere, this serves tooling and tests.
    pub fn issue(&self, id: UserId, role: Role, ttl: time::Duration) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            id,
            role,
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub(crate) fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256)).map(|data| data.claims)
    }
}
