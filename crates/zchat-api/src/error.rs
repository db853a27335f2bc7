use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use zchat_service::ChatError;

/// REST-facing error. Renders as `{"error": "..."}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    /// The request could not be extracted (body, path or query string).
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Chat(ChatError::Validation(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Chat(ChatError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Self::Chat(ChatError::AlreadyDeleted) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Rejected { status, .. } => *status,
            Self::Chat(ChatError::Encryption(_) | ChatError::Storage(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Chat(e) => e.client_message(),
            Self::Internal(e) => {
                error!("Request failed: {:#}", e);
                self.to_string()
            }
            other => other.to_string(),
        };
        if let Self::Chat(e @ (ChatError::Storage(_) | ChatError::Encryption(_))) = &self {
            error!("Request failed: {}", e);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
