use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{error, warn};

use zchat_service::store::UserStore;
use zchat_types::api::Claims;
use zchat_types::models::UserId;

use crate::Gateway;
use crate::connection;

/// Subprotocol name that marks the token-carrying subprotocol list.
pub const BEARER_PROTOCOL: &str = "bearer";

/// An authenticated, active user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("unknown user")]
    UnknownUser,

    #[error("account is disabled")]
    Inactive,

    #[error("identity lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

/// Turns a bearer token into an identity.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT carrying [`Claims`]; the user must still exist and be active.
pub struct JwtVerifier {
    key: DecodingKey,
    users: Arc<dyn UserStore>,
}

impl JwtVerifier {
    pub fn new(secret: &str, users: Arc<dyn UserStore>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            users,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = decode::<Claims>(token, &self.key, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        let user = self
            .users
            .get_user(claims.uid)?
            .ok_or(AuthError::UnknownUser)?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        Ok(Identity {
            user_id: user.id,
            username: user.username,
        })
    }
}

/// Where the bearer token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Subprotocol,
}

/// `Authorization: Bearer <token>`, or failing that a
/// `Sec-WebSocket-Protocol: bearer, <token>` list.
pub fn bearer_token(headers: &HeaderMap) -> Option<(String, TokenSource)> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = from_header {
        return Some((token.to_string(), TokenSource::Header));
    }

    let protocols = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())?;
    let mut parts = protocols.split(',').map(str::trim);
    let marker = parts.next()?;
    if !marker.eq_ignore_ascii_case(BEARER_PROTOCOL) {
        return None;
    }
    parts
        .next()
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_string(), TokenSource::Subprotocol))
}

/// Exact-match allow-list for the `Origin` header (scheme and host, plus the
/// port when one is given).
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = origins
            .into_iter()
            .map(|o| normalize_origin(o.as_ref()))
            .filter(|o| !o.is_empty())
            .collect();
        Self { allowed }
    }

    /// A missing origin is rejected.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        origin
            .map(normalize_origin)
            .is_some_and(|o| self.allowed.iter().any(|a| *a == o))
    }

    pub fn origins(&self) -> &[String] {
        &self.allowed
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// `GET /ws`: origin check, then token, then upgrade.
pub async fn upgrade(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !gateway.origins().allows(origin) {
        warn!("Rejected WebSocket upgrade from origin {:?}", origin);
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let Some((token, source)) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };

    let verifier = gateway.verifier();
    let identity = match tokio::task::spawn_blocking(move || verifier.verify(&token)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(AuthError::Lookup(e))) => {
            error!("Identity lookup failed during handshake: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Ok(Err(e)) => {
            warn!("Rejected WebSocket upgrade: {}", e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let ws = match source {
        TokenSource::Subprotocol => ws.protocols([BEARER_PROTOCOL]),
        TokenSource::Header => ws,
    };
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, identity))
}
