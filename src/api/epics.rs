//! Epic endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use std::str::FromStr;

use crate::models::{Epic, EpicStatus};
use crate::store::epics::UpdateEpic;
use crate::SwarmError;

use super::types::*;
use super::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateEpicRequest>,
) -> Result<(StatusCode, Json<Epic>), SwarmError> {
    let epic = state.epics.create(&request.name, request.goal).await?;
    Ok((StatusCode::CREATED, Json(epic)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Epic>>, SwarmError> {
    Ok(Json(state.epics.list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(epic_id): Path<String>,
) -> Result<Json<Epic>, SwarmError> {
    Ok(Json(state.epics.get_required(&epic_id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(epic_id): Path<String>,
    Json(request): Json<UpdateEpicRequest>,
) -> Result<Json<Epic>, SwarmError> {
    let status = request
        .status
        .map(|raw| EpicStatus::from_str(&raw).map_err(SwarmError::Validation))
        .transpose()?;

    let epic = state
        .epics
        .update(
            &epic_id,
            UpdateEpic {
                name: request.name,
                goal: request.goal,
                status,
            },
        )
        .await?;
    Ok(Json(epic))
}
