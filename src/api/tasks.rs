//! Task endpoints: creation, queries, and every lifecycle transition.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use std::str::FromStr;

use crate::auth::AgentId;
use crate::constants::DEFAULT_LIST_LIMIT;
use crate::engine::{CreateTask, FinishStatus};
use crate::models::{Task, TaskContext, TaskSource};
use crate::store::tasks::TaskFilter;
use crate::SwarmError;

use super::types::*;
use super::AppState;

/// `POST /api/tasks` — create per the owner-or-pool policy.
pub async fn create(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), SwarmError> {
    let source = match request.source.as_deref() {
        Some(raw) => TaskSource::from_str(raw).map_err(SwarmError::Validation)?,
        None => TaskSource::Api,
    };

    let mut args = CreateTask::new(request.description, source);
    args.created_by = Some(agent_id);
    args.agent_id = request.agent_id;
    args.offered_to = request.offered_to;
    args.backlog = request.backlog;
    args.task_type = request.task_type;
    args.tags = request.tags;
    args.priority = request.priority;
    args.depends_on = request.depends_on;
    args.epic_id = request.epic_id;
    args.parent_task_id = request.parent_task_id;
    args.claude_session_id = request.claude_session_id;
    args.context = TaskContext {
        slack_channel_id: request.slack_channel_id,
        slack_thread_ts: request.slack_thread_ts,
        slack_user_id: request.slack_user_id,
        github_repo: request.github_repo,
        github_issue_number: request.github_issue_number,
        ..Default::default()
    };

    let task = state.engine.create(args).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `GET /api/tasks` with status/agent/search filters.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, SwarmError> {
    let tasks = state
        .tasks
        .list(TaskFilter {
            status: query.status,
            agent_id: query.agent_id,
            search: query.search,
            limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500),
            offset: query.offset.unwrap_or(0).max(0),
        })
        .await?;

    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, SwarmError> {
    Ok(Json(state.tasks.get_required(&task_id).await?))
}

/// `POST /api/tasks/:id/claim` — worker claims from the pool.
pub async fn claim(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, SwarmError> {
    Ok(Json(state.engine.claim(&task_id, &agent_id).await?))
}

pub async fn accept(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, SwarmError> {
    Ok(Json(state.engine.accept(&task_id, &agent_id).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
    body: Option<Json<RejectTaskRequest>>,
) -> Result<Json<Task>, SwarmError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .reject(
                &task_id,
                &agent_id,
                request.reason,
                request.requeue.unwrap_or(true),
            )
            .await?,
    ))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, SwarmError> {
    Ok(Json(state.engine.activate(&task_id).await?))
}

/// `POST /api/tasks/:id/finish` — idempotent terminal transition.
pub async fn finish(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
    Json(request): Json<FinishTaskRequest>,
) -> Result<Json<FinishTaskResponse>, SwarmError> {
    let status = match request.status.as_str() {
        "completed" => FinishStatus::Completed,
        "failed" => FinishStatus::Failed,
        other => {
            return Err(SwarmError::Validation(format!(
                "finish status must be 'completed' or 'failed', got '{other}'"
            )))
        }
    };

    let outcome = state
        .engine
        .finish(
            &task_id,
            &agent_id,
            status,
            request.output,
            request.failure_reason,
        )
        .await?;

    Ok(Json(FinishTaskResponse {
        task: outcome.task,
        already_finished: outcome.already_finished,
    }))
}

pub async fn pause(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
    body: Option<Json<PauseTaskRequest>>,
) -> Result<Json<Task>, SwarmError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .pause(&task_id, &agent_id, request.progress)
            .await?,
    ))
}

pub async fn resume(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, SwarmError> {
    Ok(Json(state.engine.resume(&task_id, &agent_id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(task_id): Path<String>,
    body: Option<Json<CancelTaskRequest>>,
) -> Result<Json<Task>, SwarmError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .cancel(&task_id, &agent_id, request.reason)
            .await?,
    ))
}

/// `GET /api/paused-tasks` — the caller's paused tasks (resume sweep).
pub async fn paused(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
) -> Result<Json<TaskListResponse>, SwarmError> {
    let tasks = state.tasks.paused_for_agent(&agent_id).await?;
    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

/// `GET /cancelled-tasks?taskId=a,b` — the in-child cancellation hook.
pub async fn cancelled(
    State(state): State<AppState>,
    Query(query): Query<CancelledQuery>,
) -> Result<Json<CancelledResponse>, SwarmError> {
    let ids: Vec<String> = query
        .task_id
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let cancelled = state
        .tasks
        .cancelled_among(ids)
        .await?
        .into_iter()
        .map(|task| CancelledTask {
            id: task.id,
            failure_reason: task.failure_reason,
        })
        .collect();

    Ok(Json(CancelledResponse { cancelled }))
}
