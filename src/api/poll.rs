//! The long-poll endpoint.

use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::auth::AgentId;
use crate::constants::LONG_POLL_MAX_TIMEOUT_MS;
use crate::SwarmError;

use super::types::{PollQuery, PollResponse};
use super::AppState;

/// `GET /api/poll?timeoutMs=` — one trigger or null.
///
/// With no timeout hint the resolver answers from a single pass; a hint
/// turns the call into a bounded long-poll (ceiling 60 s).
pub async fn poll(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>, SwarmError> {
    let timeout_ms = query
        .timeout_ms
        .unwrap_or(0)
        .min(LONG_POLL_MAX_TIMEOUT_MS);

    let trigger = if timeout_ms == 0 {
        state.resolver.next_trigger(&agent_id).await?
    } else {
        state.resolver.poll(&agent_id, timeout_ms).await?
    };

    Ok(Json(PollResponse { trigger }))
}
