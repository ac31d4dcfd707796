use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Convenience type alias for Results with SwarmError
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Main error type for Swarm Core
///
/// The engine and stores return typed failures; the HTTP layer translates
/// them to status codes via the [`IntoResponse`] impl below. Transactions
/// roll back whenever one of these propagates out of a store closure.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Missing X-Agent-ID header")]
    MissingAgentHeader,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transition not allowed from the row's current state. The message
    /// always names the current state so callers can diagnose races.
    #[error("Invalid state: {0}")]
    StateViolation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Broker API error: {0}")]
    BrokerApi(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<tokio::task::JoinError> for SwarmError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl SwarmError {
    /// HTTP status for this error, per the broker's error contract.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SwarmError::Validation(_) | SwarmError::StateViolation(_) => StatusCode::BAD_REQUEST,
            SwarmError::MissingAgentHeader => StatusCode::BAD_REQUEST,
            SwarmError::Unauthorized => StatusCode::UNAUTHORIZED,
            SwarmError::Forbidden(_) => StatusCode::FORBIDDEN,
            SwarmError::NotFound { .. } => StatusCode::NOT_FOUND,
            SwarmError::Conflict(_) => StatusCode::CONFLICT,
            SwarmError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SwarmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal errors get a bounded details string; everything else
        // carries its own human-readable message.
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
            let details: String = self.to_string().chars().take(200).collect();
            json!({ "error": "Internal server error", "details": details })
        } else {
            json!({ "error": self.to_string() })
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            SwarmError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SwarmError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SwarmError::MissingAgentHeader.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SwarmError::NotFound {
                entity: "task",
                id: "t1".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SwarmError::Conflict("agent name taken".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SwarmError::StateViolation("task is completed".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SwarmError::Forbidden("not the owner".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            SwarmError::ServiceUnavailable("slack disabled".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = SwarmError::NotFound {
            entity: "task",
            id: "abc".into(),
        };
        assert_eq!(err.to_string(), "task not found: abc");
    }
}
