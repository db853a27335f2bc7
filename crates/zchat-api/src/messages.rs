use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use zchat_gateway::handshake::Identity;
use zchat_service::{ChatError, FileRef};
use zchat_types::api::{EditMessageRequest, SendMessageRequest};
use zchat_types::events::ServerEvent;
use zchat_types::models::{ConversationId, DeleteMode, MessageId};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Clamped to the configured page size
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// `for_me` when absent
    pub delete_type: Option<String>,
}

/// History page, oldest first.
pub async fn list(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<ConversationId>,
    ApiQuery(query): ApiQuery<MessageQuery>,
    Extension(me): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let views = blocking(move || {
        let messages = services
            .messages
            .list(conversation_id, me.user_id, query.limit)?;
        Ok(services.messages.to_views(&messages)?)
    })
    .await?;

    Ok(Json(views))
}

/// Post a message over HTTP. Connected participants get the same `message`
/// event as for a socket post.
pub async fn send(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<ConversationId>,
    Extension(me): Extension<Identity>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let (view, targets) = blocking(move || {
        let message = services.messages.create(
            conversation_id,
            me.user_id,
            &req.content,
            FileRef::new(req.file_path, req.file_type),
        )?;
        let view = services.messages.to_view(&message)?;
        let targets = services.conversations.participant_ids(conversation_id)?;
        Ok((view, targets))
    })
    .await?;

    state
        .hub
        .broadcast_to_users(&targets, &ServerEvent::new_message(view.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(view)))
}

/// `PUT /messages/{id}`: same rules and broadcast as an `edit_message` event.
pub async fn edit(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<MessageId>,
    Extension(me): Extension<Identity>,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.services.clone();
    let (view, targets) = blocking(move || {
        let edited = services.messages.edit(message_id, me.user_id, &req.content)?;
        let view = services.messages.to_view(&edited)?;
        let targets = services
            .conversations
            .participant_ids(edited.conversation_id)?;
        Ok((view, targets))
    })
    .await?;

    state
        .hub
        .broadcast_to_users(
            &targets,
            &ServerEvent::MessageEdited {
                message_id: view.id,
                conversation_id: view.conversation_id,
                content: view.content.clone(),
                is_edited: true,
            },
        )
        .await;

    Ok(Json(view))
}

/// `DELETE /messages/{id}?delete_type=for_me|for_everyone`. A for-me delete
/// is only announced to the caller's own connections.
pub async fn delete(
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<MessageId>,
    ApiQuery(query): ApiQuery<DeleteQuery>,
    Extension(me): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = match query.delete_type.as_deref() {
        None | Some("") => DeleteMode::ForMe,
        Some(raw) => raw
            .parse::<DeleteMode>()
            .map_err(|e| ChatError::validation(e.to_string()))?,
    };

    let services = state.services.clone();
    let user_id = me.user_id;
    let (view, targets) = blocking(move || {
        let message = services.messages.delete(message_id, user_id, mode)?;
        let view = services.messages.to_view(&message)?;
        let targets = match mode {
            DeleteMode::ForEveryone => services
                .conversations
                .participant_ids(message.conversation_id)?,
            DeleteMode::ForMe => vec![user_id],
        };
        Ok((view, targets))
    })
    .await?;

    info!(
        "{} ({}) deleted message {} ({}) over REST",
        me.username, user_id, message_id, mode
    );
    state
        .hub
        .broadcast_to_users(
            &targets,
            &ServerEvent::MessageDeleted {
                message_id,
                conversation_id: view.conversation_id,
                delete_type: mode,
            },
        )
        .await;

    Ok(Json(view))
}
