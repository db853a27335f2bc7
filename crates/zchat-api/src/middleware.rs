use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use zchat_gateway::handshake::AuthError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header. The verified
/// [`Identity`](zchat_gateway::handshake::Identity) is stored as a request
/// extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .ok_or(ApiError::Unauthorized("missing bearer token"))?;

    let verifier = state.verifier.clone();
    let identity = match tokio::task::spawn_blocking(move || verifier.verify(&token)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(AuthError::Lookup(e))) => return Err(ApiError::Internal(e)),
        Ok(Err(e)) => {
            warn!("Rejected request to {}: {}", req.uri().path(), e);
            return Err(ApiError::Unauthorized("invalid or expired token"));
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return Err(ApiError::Internal(anyhow::anyhow!("auth task failed")));
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
