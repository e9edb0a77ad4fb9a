//! Token-based authentication.
//!
//! Every authenticated route takes an [`AuthUser`] extractor. The token is looked up in
//! the `Authorization: Bearer` header, then `x-auth-token`, then the `token` cookie and
//! finally a `?token=` query parameter. Role gates are checked with [`AuthUser::require`].

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use axum_extra::{
    extract::CookieJar,
    headers::{authorization::Bearer, Authorization, HeaderMapExt},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{error::AppError, models::Role, state::AppState};

pub const TOKEN_COOKIE: &str = "token";
pub const TOKEN_HEADER: &str = "x-auth-token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Access denied. No token provided.")]
    MissingToken,

    #[error("Invalid token.")]
    InvalidToken,

    #[error("Access denied. Insufficient permissions.")]
    InsufficientRole,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, id: i32, email: &str, role: Role) -> Result<String, AuthError> {
        let now = Utc::now();
        self.sign(&Claims {
            id,
            email: email.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        Ok(jsonwebtoken::encode(&Header::default(), claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected token");
                AuthError::InvalidToken
            })
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pulls a raw token out of the request, honouring the lookup order above.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(Authorization(bearer)) = parts.headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    if let Some(v) = parts
        .headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(v.to_string());
    }

    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(c) = jar.get(TOKEN_COOKIE).filter(|c| !c.value().is_empty()) {
        return Some(c.value().to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

/// The caller behind a verified token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, roles: &[Role]) -> Result<(), AuthError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::InsufficientRole)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

impl From<Claims> for AuthUser {
    fn from(c: Claims) -> Self {
        Self {
            id: c.id,
            email: c.email,
            role: c.role,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or(AuthError::MissingToken)?;
        let claims = state.jwt.verify(&token)?;
        Ok(claims.into())
    }
}

/// Like [`AuthUser`] but for routes that are public and only personalise when a valid
/// token is present. A bad token is treated as anonymous.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = token_from_parts(parts)
            .and_then(|t| state.jwt.verify(&t).ok())
            .map(AuthUser::from);
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn bearer_header_wins_over_other_sources() {
        let p = parts(
            Request::builder()
                .uri("/api/x?token=from-query")
                .header("authorization", "Bearer from-header")
                .header("x-auth-token", "from-x-auth")
                .header("cookie", "token=from-cookie")
                .body(())
                .unwrap(),
        );
        assert_eq!(token_from_parts(&p).as_deref(), Some("from-header"));
    }

    #[test]
    fn falls_back_through_cookie_then_query() {
        let p = parts(
            Request::builder()
                .uri("/api/x?token=from-query")
                .header("cookie", "theme=dark; token=from-cookie")
                .body(())
                .unwrap(),
        );
        assert_eq!(token_from_parts(&p).as_deref(), Some("from-cookie"));

        let p = parts(Request::builder().uri("/api/x?page=2&token=q").body(()).unwrap());
        assert_eq!(token_from_parts(&p).as_deref(), Some("q"));

        let p = parts(Request::builder().uri("/api/x").body(()).unwrap());
        assert_eq!(token_from_parts(&p), None);
    }

    #[test]
    fn issued_token_verifies_with_same_secret_only() {
        let keys = JwtKeys::new("s3cret", 1);
        let token = keys.issue(7, "a@b.io", Role::Instructor).unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.role, Role::Instructor);

        let other = JwtKeys::new("different", 1);
        assert!(matches!(other.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new("s3cret", 1);
        let past = Utc::now() - Duration::hours(3);
        let token = keys
            .sign(&Claims {
                id: 1,
                email: "old@b.io".into(),
                role: Role::Student,
                iat: past.timestamp(),
                exp: (past + Duration::hours(1)).timestamp(),
            })
            .unwrap();
        assert!(matches!(keys.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn role_gate() {
        let user = AuthUser {
            id: 1,
            email: "s@b.io".into(),
            role: Role::Student,
        };
        assert!(user.require(&[Role::Student]).is_ok());
        assert!(matches!(
            user.require(&[Role::Instructor, Role::Admin]),
            Err(AuthError::InsufficientRole)
        ));
    }
}
