use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;

use zchat_db::Database;
use zchat_gateway::handshake::{Identity, TokenVerifier};
use zchat_gateway::hub::Hub;
use zchat_gateway::presence::Presence;
use zchat_service::{ChatError, ChatServices};
use zchat_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest, UserSummary};
use zchat_types::models::UserId;

use crate::blocking;
use crate::error::ApiError;
use crate::extract::ApiJson;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub services: ChatServices,
    pub hub: Hub,
    pub presence: Presence,
    pub verifier: Arc<dyn TokenVerifier>,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.chars().count() < 3 || username.chars().count() > 32 {
        return Err(ApiError::BadRequest(
            "username must be 3 to 32 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let db = state.db.clone();
    let name = username.clone();
    let user = blocking(move || {
        if db.get_user_by_username(&name)?.is_some() {
            return Err(ApiError::Conflict("username is already taken"));
        }
        Ok(db.create_user(&name, &password_hash)?)
    })
    .await?;

    let token = create_token(&state.jwt_secret, user.id, &user.username, state.token_ttl)?;
    info!("Registered user {} ({})", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: user.id,
            username: user.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let username = req.username.trim().to_string();
    let row = blocking(move || Ok(db.get_user_by_username(&username)?))
        .await?
        .ok_or(ApiError::Unauthorized("invalid username or password"))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password_hash)
        .map_err(|e| anyhow::anyhow!("stored hash for user {} is invalid: {}", row.user.id, e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized("invalid username or password"))?;

    if !row.user.is_active {
        return Err(ApiError::Unauthorized("account is disabled"));
    }

    let token = create_token(
        &state.jwt_secret,
        row.user.id,
        &row.user.username,
        state.token_ttl,
    )?;

    Ok(Json(AuthResponse {
        user_id: row.user.id,
        username: row.user.username,
        token,
    }))
}

/// The caller's own account, read fresh from the store.
pub async fn me(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || Ok(db.get_user(me.user_id)?))
        .await?
        .ok_or(ChatError::NotFound("user"))?;
    Ok(Json(UserSummary::from(user)))
}

/// Tokens are stateless, so logging out only affects presence. The user is
/// marked offline unless a socket of theirs is still connected; closing it
/// takes care of that.
pub async fn logout(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
) -> impl IntoResponse {
    if state.presence.release(me.user_id, &me.username).await {
        info!("{} ({}) logged out", me.username, me.user_id);
    }
    StatusCode::NO_CONTENT
}

pub fn create_token(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let expires_at = chrono::Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| anyhow::anyhow!("token lifetime {} is out of range", ttl))?;
    let claims = Claims {
        sub: username.to_string(),
        uid: user_id,
        exp: expires_at.timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
