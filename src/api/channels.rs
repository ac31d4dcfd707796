//! Internal chat endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

use crate::auth::AgentId;
use crate::constants::DEFAULT_LIST_LIMIT;
use crate::models::{Channel, ChannelMessage};
use crate::SwarmError;

use super::types::*;
use super::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<Channel>), SwarmError> {
    let channel = state.channels.create(&request.name, request.is_dm).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Channel>>, SwarmError> {
    Ok(Json(state.channels.list().await?))
}

/// `POST /api/channels/:id/messages` — agents post as themselves; the
/// dashboard posts with `asHuman` and a null author.
pub async fn post_message(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(channel_id): Path<String>,
    Json(request): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<ChannelMessage>), SwarmError> {
    let author = if request.as_human {
        None
    } else {
        Some(agent_id)
    };

    let message = state
        .channels
        .post_message(
            &channel_id,
            author,
            &request.content,
            request.reply_to_id,
            request.mentions,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/channels/:id/messages` — also advances the caller's read
/// cursor, which is what clears an `unread_mentions` trigger.
pub async fn messages(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(channel_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChannelMessage>>, SwarmError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
    Ok(Json(
        state
            .channels
            .messages(&channel_id, Some(agent_id), limit)
            .await?,
    ))
}
