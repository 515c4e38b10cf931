//! JWT sessions and bcrypt password hashing.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Actor, Role, User};

use crate::routes::ApiError;
use crate::server::AppState;

/// Token payload: user id and the role at issue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing keys plus token lifetime.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| VendHubError::Other(format!("Token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| VendHubError::AuthFailed(format!("Invalid token: {e}")))
    }
}

/// Hash a password on the blocking pool.
pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| VendHubError::Other(format!("Hash task failed: {e}")))?
        .map_err(|e| VendHubError::Other(format!("Password hashing failed: {e}")))
}

/// Check a password against a stored hash on the blocking pool.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| VendHubError::Other(format!("Verify task failed: {e}")))?
        .map_err(|e| VendHubError::Other(format!("Password verification failed: {e}")))
}

/// Resolve a token to the acting user. The role comes from the database so
/// role changes and deactivation take effect before the token expires.
pub fn authenticate(state: &AppState, token: &str) -> Result<Actor> {
    let claims = state.jwt.verify(token)?;
    let user = state
        .db
        .get_user(&claims.sub)
        .map_err(|_| VendHubError::AuthFailed("Unknown user".into()))?;
    if !user.active {
        return Err(VendHubError::AuthFailed("Account is deactivated".into()));
    }
    Ok(Actor::new(user.id, user.role))
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Auth middleware: validates `Authorization: Bearer <jwt>` and stores the [`Actor`].
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let token = bearer_token(&req)
        .ok_or_else(|| VendHubError::AuthFailed("Missing bearer token".into()))?;
    let actor = authenticate(&state, token)?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
