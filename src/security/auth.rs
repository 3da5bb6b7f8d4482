//! Bearer-token authentication for the API.
//!
//! Tokens are HS256 JWTs whose `sub` claim carries the user id. Identity
//! provisioning and token issuance live outside this service; handlers
//! receive an [`AuthenticatedUser`] through the axum extractor below.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::state::AppState;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    ExpiredToken,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken => StatusCode::UNAUTHORIZED,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::ExpiredToken => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::MissingToken => "Authentication token is required".to_string(),
            Self::InvalidToken => "Invalid authentication token".to_string(),
            Self::ExpiredToken => "Authentication token has expired".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.error_code(),
            "message": self.message()
        }));
        (status, body).into_response()
    }
}

/// Validate an `Authorization` header value and resolve it to a user.
pub fn authenticate_bearer(
    auth_header: Option<&str>,
    secret: &[u8],
) -> Result<AuthenticatedUser, AuthError> {
    let header = auth_header.ok_or(AuthError::MissingToken)?;
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::InvalidToken)?;
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }

    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).map_err(
        |e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        },
    )?;

    let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken)?;
    Ok(AuthenticatedUser {
        user_id,
        email: data.claims.email,
    })
}

/// Mint an access token for `user_id`. Used by operational tooling and tests.
pub fn issue_access_token(
    user_id: Uuid,
    email: Option<String>,
    secret: &[u8],
    ttl_seconds: i64,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + ttl_seconds,
        iat: now,
        email,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|_| AuthError::InvalidToken)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        authenticate_bearer(auth_header, state.config.auth.jwt_secret.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_missing_header_is_rejected() {
        let err = authenticate_bearer(None, SECRET).unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[test]
    fn test_non_bearer_scheme_is_rejected() {
        let err = authenticate_bearer(Some("Basic dXNlcjpwdw=="), SECRET).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[test]
    fn test_valid_token_resolves_to_user() {
        let user_id = Uuid::new_v4();
        let token =
            issue_access_token(user_id, Some("student@example.com".to_string()), SECRET, 600)
                .unwrap();
        let header = format!("Bearer {}", token);
        let user = authenticate_bearer(Some(&header), SECRET).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email.as_deref(), Some("student@example.com"));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let token = issue_access_token(Uuid::new_v4(), None, SECRET, -3600).unwrap();
        let header = format!("Bearer {}", token);
        let err = authenticate_bearer(Some(&header), SECRET).unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken));
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token = issue_access_token(Uuid::new_v4(), None, b"other-secret", 600).unwrap();
        let header = format!("Bearer {}", token);
        let err = authenticate_bearer(Some(&header), SECRET).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
