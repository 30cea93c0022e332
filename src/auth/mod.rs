use std::fmt;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::{Deserialize, Serialize};

use crate::{chat::UserId, AppError, AppResult};

mod jwt;

pub use jwt::JwtKeys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Admin => "admin",
            User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the caller, verified from the `Authorization: Bearer` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub role: Role,
}

impl AuthUser {
    pub fn require_admin(&self) -> AppResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::User => Err(AppError::Forbidden("admin role required".into())),
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

        let claims = JwtKeys::from_ref(state).verify(token).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            AppError::Unauthorized("invalid token".into())
        })?;

        Ok(AuthUser {
            id: claims.id,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(keys: &JwtKeys, header: Option<String>) -> AppResult<AuthUser> {
        let mut request = Request::builder().uri("/api/chat/users");
        if let Some(header) = header {
            request = request.header(AUTHORIZATION, header);
        }
        let (mut parts, _) = request.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, keys).await
    }

    #[tokio::test]
    async fn accepts_valid_bearer_token() {
        let keys = JwtKeys::new(b"test-secret");
        let token = keys.issue(7, Role::Admin, time::Duration::hours(1)).unwrap();

        let user = extract(&keys, Some(format!("Bearer {token}"))).await.unwrap();
        assert_eq!(user, AuthUser { id: 7, role: Role::Admin });
        assert!(user.require_admin().is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_and_foreign_tokens() {
        let keys = JwtKeys::new(b"test-secret");
        assert!(matches!(extract(&keys, None).await, Err(AppError::Unauthorized(_))));

        let token = JwtKeys::new(b"other-secret").issue(7, Role::User, time::Duration::hours(1)).unwrap();
        assert!(matches!(
            extract(&keys, Some(format!("Bearer {token}"))).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(extract(&keys, Some(token)).await, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn users_are_not_admins() {
        let user = AuthUser { id: 1, role: Role::User };
        assert!(matches!(user.require_admin(), Err(AppError::Forbidden(_))));
    }
}
