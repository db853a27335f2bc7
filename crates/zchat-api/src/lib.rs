pub mod auth;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod users;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::require_auth;

/// Auth routes are public; everything else sits behind [`require_auth`].
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::list))
        .route("/users/online", get(users::online))
        .route("/users/{id}", get(users::get))
        .route(
            "/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route("/conversations/{id}", get(conversations::get))
        .route("/conversations/{id}/read", post(conversations::mark_read))
        .route(
            "/conversations/{id}/messages",
            get(messages::list).post(messages::send),
        )
        .route(
            "/messages/{id}",
            put(messages::edit).delete(messages::delete),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    public_routes.merge(protected_routes).with_state(state)
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
}
