//! Health, observability, and registry endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};

use std::str::FromStr;

use axum::extract::Path;

use crate::auth::AgentId;
use crate::models::{GlobalConfig, InboxMessage, InboxStatus, Repo, Service, SessionCost, SessionLog};
use crate::store::services::RegisterService;
use crate::store::sessions::{AppendCost, AppendLogs};
use crate::SwarmError;

use super::types::*;
use super::{AppState, SERVICE_NAME, SERVICE_VERSION};

/// `GET /health` — unauthenticated liveness for load balancers.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION
    }))
}

/// `POST /api/session-logs` — batched child stdout lines. Best-effort
/// from the runner's side; the row is durable once we return.
pub async fn append_session_logs(
    State(state): State<AppState>,
    Json(request): Json<SessionLogsRequest>,
) -> Result<Json<AcceptedResponse>, SwarmError> {
    if request.lines.is_empty() {
        return Err(SwarmError::Validation("lines must not be empty".into()));
    }
    state
        .sessions
        .append_logs(AppendLogs {
            session_id: request.session_id,
            iteration: request.iteration,
            task_id: request.task_id,
            cli: request.cli,
            lines: request.lines,
        })
        .await?;
    Ok(Json(AcceptedResponse { ok: true }))
}

/// `POST /api/session-costs` — one cost record per child result line.
pub async fn append_session_cost(
    State(state): State<AppState>,
    Json(request): Json<SessionCostRequest>,
) -> Result<Json<AcceptedResponse>, SwarmError> {
    state
        .sessions
        .append_cost(AppendCost {
            session_id: request.session_id,
            iteration: request.iteration,
            task_id: request.task_id,
            cost_usd: request.cost_usd,
            input_tokens: request.input_tokens,
            output_tokens: request.output_tokens,
            cache_read_tokens: request.cache_read_tokens,
            cache_creation_tokens: request.cache_creation_tokens,
            model: request.model,
        })
        .await?;
    Ok(Json(AcceptedResponse { ok: true }))
}

/// `GET /api/session-logs?sessionId=` — a session's streamed output.
pub async fn list_session_logs(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<SessionLog>>, SwarmError> {
    Ok(Json(state.sessions.logs_for_session(&query.session_id).await?))
}

/// `GET /api/session-costs?sessionId=` — a session's cost records.
pub async fn list_session_costs(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<SessionCost>>, SwarmError> {
    Ok(Json(
        state.sessions.costs_for_session(&query.session_id).await?,
    ))
}

/// `POST /api/inbox/:id/status` — the lead reports how it handled a
/// claimed inbox message.
pub async fn set_inbox_status(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(message_id): Path<String>,
    Json(request): Json<InboxStatusRequest>,
) -> Result<Json<InboxMessage>, SwarmError> {
    let status = InboxStatus::from_str(&request.status).map_err(SwarmError::Validation)?;

    let message = state.inbox.get_required(&message_id).await?;
    if message.agent_id != agent_id {
        return Err(SwarmError::Forbidden(format!(
            "inbox message {message_id} belongs to another agent"
        )));
    }

    Ok(Json(
        state
            .inbox
            .set_status(
                &message_id,
                status,
                request.response_text,
                request.delegated_to_task_id,
            )
            .await?,
    ))
}

pub async fn register_service(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Json(request): Json<RegisterServiceRequest>,
) -> Result<(StatusCode, Json<Service>), SwarmError> {
    let service = state
        .services
        .register(RegisterService {
            agent_id,
            name: request.name,
            port: request.port,
            script: request.script,
            health_path: request.health_path,
            url: request.url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ServicesQuery>,
) -> Result<Json<Vec<Service>>, SwarmError> {
    Ok(Json(state.services.list(query.agent_id).await?))
}

pub async fn create_repo(
    State(state): State<AppState>,
    Json(request): Json<CreateRepoRequest>,
) -> Result<(StatusCode, Json<Repo>), SwarmError> {
    let repo = state
        .repos
        .create(
            &request.name,
            &request.url,
            request.default_branch,
            request.agent_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(repo)))
}

pub async fn list_repos(State(state): State<AppState>) -> Result<Json<Vec<Repo>>, SwarmError> {
    Ok(Json(state.repos.list().await?))
}

pub async fn list_configs(
    State(state): State<AppState>,
    Query(query): Query<ConfigsQuery>,
) -> Result<Json<Vec<GlobalConfig>>, SwarmError> {
    Ok(Json(state.configs.list(query.scope).await?))
}

pub async fn set_config(
    State(state): State<AppState>,
    Json(request): Json<SetConfigRequest>,
) -> Result<Json<AcceptedResponse>, SwarmError> {
    if request.key.trim().is_empty() {
        return Err(SwarmError::Validation("config key is required".into()));
    }
    state
        .configs
        .set(&request.scope, &request.key, &request.value)
        .await?;
    Ok(Json(AcceptedResponse { ok: true }))
}

/// `POST /api/configs/reload` — re-import stored env entries into the
/// process environment.
pub async fn reload_configs(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, SwarmError> {
    let imported = state.configs.import_env().await?;
    Ok(Json(ReloadResponse { imported }))
}
