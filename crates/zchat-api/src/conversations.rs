use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use zchat_gateway::handshake::Identity;
use zchat_types::api::CreateConversationRequest;
use zchat_types::events::ServerEvent;
use zchat_types::models::ConversationId;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};

/// Find or start the conversation with exactly these participants.
pub async fn create(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    ApiJson(req): ApiJson<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let overview = blocking(move || {
        let conversation = services.conversations.create_or_get(
            &req.participant_ids,
            req.is_group,
            req.name.as_deref(),
            me.user_id,
        )?;
        Ok(services.inbox.overview(conversation.id, me.user_id)?)
    })
    .await?;

    Ok(Json(overview))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let overviews = blocking(move || Ok(services.inbox.list(me.user_id)?)).await?;
    Ok(Json(overviews))
}

pub async fn get(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<ConversationId>,
    Extension(me): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let overview = blocking(move || Ok(services.inbox.overview(id, me.user_id)?)).await?;
    Ok(Json(overview))
}

/// Same effect as a `mark_read` socket event, receipt included.
pub async fn mark_read(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<ConversationId>,
    Extension(me): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let user_id = me.user_id;
    let targets = blocking(move || {
        services.messages.mark_all_read(id, user_id)?;
        services.conversations.mark_read(id, user_id)?;
        Ok(services.conversations.participant_ids(id)?)
    })
    .await?;

    state
        .hub
        .broadcast_to_users(
            &targets,
            &ServerEvent::MessagesRead {
                conversation_id: id,
                user_id,
            },
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
