//! Admin authentication: HS256 bearer tokens carrying an `admin` role.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AdminError, ServiceError};
use crate::AppState;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Admin identity recorded as the actor on approvals and rejections.
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Signs a token; used by operators' tooling and the test suite.
pub fn issue_token(
    secret: &str,
    subject: &str,
    roles: &[&str],
    ttl: Duration,
) -> Result<String, ServiceError> {
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {e}")))
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ServiceError::Unauthorized("token expired".into())
        }
        _ => ServiceError::Unauthorized("invalid token".into()),
    })
}

/// Extractor for admin-only handlers.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub actor: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?;

        let claims = validate_token(&state.config.jwt_secret, token)?;
        if !claims.has_role(ADMIN_ROLE) {
            return Err(ServiceError::Forbidden("admin role required".into()).into());
        }
        debug!(actor = %claims.sub, "admin authenticated");
        Ok(AdminUser { actor: claims.sub })
    }
}
