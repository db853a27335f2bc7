use axum::{Json, extract::State, response::IntoResponse};

use zchat_service::ChatError;
use zchat_types::api::UserSummary;
use zchat_types::models::UserId;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::extract::ApiPath;

/// Directory page size.
const USER_LIST_LIMIT: usize = 100;

/// Active users in sign-up order.
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let users = blocking(move || Ok(db.list_active_users(0, USER_LIST_LIMIT)?)).await?;
    Ok(Json(users.into_iter().map(UserSummary::from).collect::<Vec<_>>()))
}

pub async fn online(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let users = blocking(move || Ok(db.list_online_users()?)).await?;
    Ok(Json(users.into_iter().map(UserSummary::from).collect::<Vec<_>>()))
}

pub async fn get(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || Ok(db.get_user(id)?))
        .await?
        .ok_or(ChatError::NotFound("user"))?;
    Ok(Json(UserSummary::from(user)))
}
