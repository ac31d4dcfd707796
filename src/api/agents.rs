//! Agent registration and status endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::info;

use crate::auth::AgentId;
use crate::models::Agent;
use crate::store::agents::RegisterAgent;
use crate::SwarmError;

use super::types::*;
use super::AppState;

/// `POST /agents` — idempotent register/upsert.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), SwarmError> {
    let agent = state
        .agents
        .register(RegisterAgent {
            id: request.id,
            name: request.name,
            is_lead: request.is_lead,
            role: request.role,
            capabilities: request.capabilities,
            max_tasks: request.max_tasks,
            identity: request.identity,
        })
        .await?;

    info!(agent_id = %agent.id, name = %agent.name, "agent registered");
    Ok((StatusCode::CREATED, Json(agent)))
}

/// `GET /agents` — the whole fleet, for the dashboard.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, SwarmError> {
    Ok(Json(state.agents.list().await?))
}

/// `GET /me?include=inbox` — the calling agent with capacity, and
/// optionally an inbox summary.
pub async fn get_me(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Query(query): Query<MeQuery>,
) -> Result<Json<MeResponse>, SwarmError> {
    let agent = state.agents.get_required(&agent_id).await?;
    let current = state.tasks.count_in_progress(&agent_id).await?;

    let inbox = if query.include.as_deref() == Some("inbox") {
        Some(InboxSummary {
            unread_count: state.inbox.count_unread(&agent_id).await?,
            recent: state.inbox.list_for_agent(&agent_id, 10).await?,
        })
    } else {
        None
    };

    let capacity = CapacityInfo {
        current,
        max: agent.max_tasks,
        available: (agent.max_tasks - current).max(0),
    };

    Ok(Json(MeResponse {
        agent,
        capacity,
        inbox,
    }))
}

/// `POST /ping` — liveness upkeep from the runner.
pub async fn ping(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
) -> Result<Json<AcceptedResponse>, SwarmError> {
    state.agents.ping(&agent_id).await?;
    Ok(Json(AcceptedResponse { ok: true }))
}

/// `POST /close` — mark the calling agent offline.
pub async fn close(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
) -> Result<Json<AcceptedResponse>, SwarmError> {
    state.agents.close(&agent_id).await?;
    info!(agent_id = %agent_id, "agent closed");
    Ok(Json(AcceptedResponse { ok: true }))
}
