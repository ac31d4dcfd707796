//! HTTP client for the broker, used by the runner supervisor.
//!
//! Network failures here are soft from the supervisor's point of view:
//! callers log, back off, and retry on the next tick rather than dying.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use crate::models::{Agent, AgentIdentity, Task};
use crate::triggers::Trigger;
use crate::{Result, SwarmError};

#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    agent_id: String,
}

/// Outcome of a finish call, mirroring the broker's response.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishResult {
    pub already_finished: bool,
}

impl BrokerClient {
    pub fn new(base_url: &str, api_key: Option<String>, agent_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            agent_id: agent_id.to_string(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("X-Agent-ID", &self.agent_id);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn expect_json<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SwarmError::Validation(format!(
                "{what} failed with {status}: {body}"
            )));
        }
        Ok(response.json::<T>().await?)
    }

    /// Register this agent (idempotent upsert).
    pub async fn register(
        &self,
        name: &str,
        is_lead: bool,
        max_tasks: u32,
        identity: Option<AgentIdentity>,
    ) -> Result<Agent> {
        let response = self
            .request(reqwest::Method::POST, "/agents")
            .json(&json!({
                "id": self.agent_id,
                "name": name,
                "isLead": is_lead,
                "maxTasks": max_tasks,
                "identity": identity,
            }))
            .send()
            .await?;
        Self::expect_json(response, "register").await
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self.request(reqwest::Method::POST, "/ping").send().await?;
        Self::expect_json::<serde_json::Value>(response, "ping").await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let response = self.request(reqwest::Method::POST, "/close").send().await?;
        Self::expect_json::<serde_json::Value>(response, "close").await?;
        Ok(())
    }

    /// Long-poll for the next trigger.
    pub async fn poll(&self, timeout_ms: u64) -> Result<Option<Trigger>> {
        #[derive(serde::Deserialize)]
        struct PollBody {
            trigger: Option<Trigger>,
        }

        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/poll?timeoutMs={timeout_ms}"),
            )
            .send()
            .await?;
        let body: PollBody = Self::expect_json(response, "poll").await?;
        Ok(body.trigger)
    }

    /// Paused tasks owned by this agent — the resume sweep.
    pub async fn paused_tasks(&self) -> Result<Vec<Task>> {
        #[derive(serde::Deserialize)]
        struct ListBody {
            tasks: Vec<Task>,
        }

        let response = self
            .request(reqwest::Method::GET, "/api/paused-tasks")
            .send()
            .await?;
        let body: ListBody = Self::expect_json(response, "paused-tasks").await?;
        Ok(body.tasks)
    }

    pub async fn resume(&self, task_id: &str) -> Result<Task> {
        let response = self
            .request(reqwest::Method::POST, &format!("/api/tasks/{task_id}/resume"))
            .send()
            .await?;
        Self::expect_json(response, "resume").await
    }

    pub async fn pause(&self, task_id: &str, progress: Option<String>) -> Result<Task> {
        let response = self
            .request(reqwest::Method::POST, &format!("/api/tasks/{task_id}/pause"))
            .json(&json!({ "progress": progress }))
            .send()
            .await?;
        Self::expect_json(response, "pause").await
    }

    /// Finish a task; an already-terminal task is reported, not an error.
    pub async fn finish(
        &self,
        task_id: &str,
        completed: bool,
        output: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<FinishResult> {
        let status = if completed { "completed" } else { "failed" };
        let response = self
            .request(reqwest::Method::POST, &format!("/api/tasks/{task_id}/finish"))
            .json(&json!({
                "status": status,
                "output": output,
                "failureReason": failure_reason,
            }))
            .send()
            .await?;
        Self::expect_json(response, "finish").await
    }

    /// Unassigned pool tasks, for the claim race after a pool trigger.
    pub async fn unassigned_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        #[derive(serde::Deserialize)]
        struct ListBody {
            tasks: Vec<Task>,
        }

        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/tasks?status=unassigned&limit={limit}"),
            )
            .send()
            .await?;
        let body: ListBody = Self::expect_json(response, "list tasks").await?;
        Ok(body.tasks)
    }

    pub async fn claim(&self, task_id: &str) -> Result<Task> {
        let response = self
            .request(reqwest::Method::POST, &format!("/api/tasks/{task_id}/claim"))
            .send()
            .await?;
        Self::expect_json(response, "claim").await
    }

    /// Push a batch of child stdout lines. Best-effort: failures only warn.
    pub async fn push_session_logs(
        &self,
        session_id: &str,
        iteration: i64,
        task_id: Option<&str>,
        cli: &str,
        lines: &[String],
    ) {
        let result = async {
            let response = self
                .request(reqwest::Method::POST, "/api/session-logs")
                .json(&json!({
                    "sessionId": session_id,
                    "iteration": iteration,
                    "taskId": task_id,
                    "cli": cli,
                    "lines": lines,
                }))
                .send()
                .await?;
            if response.status() != StatusCode::OK {
                warn!(status = %response.status(), "session-logs push rejected");
            }
            Ok::<(), SwarmError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "session-logs push failed");
        }
    }

    /// Push one cost record. Best-effort: failures only warn.
    pub async fn push_session_cost(&self, body: serde_json::Value) {
        let result = async {
            self.request(reqwest::Method::POST, "/api/session-costs")
                .json(&body)
                .send()
                .await?;
            Ok::<(), SwarmError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "session-costs push failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_parses_trigger_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/poll?timeoutMs=0")
            .match_header("x-agent-id", "agent-1")
            .with_status(200)
            .with_body(r#"{"trigger":{"type":"pool_tasks_available","count":2}}"#)
            .create_async()
            .await;

        let client = BrokerClient::new(&server.url(), None, "agent-1");
        let trigger = client.poll(0).await.unwrap().unwrap();
        assert_eq!(trigger.kind(), "pool_tasks_available");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn poll_parses_null_trigger() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/poll?timeoutMs=5000")
            .with_status(200)
            .with_body(r#"{"trigger":null}"#)
            .create_async()
            .await;

        let client = BrokerClient::new(&server.url(), None, "agent-1");
        assert!(client.poll(5000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bearer_key_is_sent_when_configured() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ping")
            .match_header("authorization", "Bearer k-123")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client = BrokerClient::new(&server.url(), Some("k-123".into()), "agent-1");
        client.ping().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn finish_surfaces_already_finished() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/tasks/t1/finish")
            .with_status(200)
            .with_body(r#"{"id":"t1","alreadyFinished":true}"#)
            .create_async()
            .await;

        let client = BrokerClient::new(&server.url(), None, "agent-1");
        let result = client.finish("t1", false, None, None).await.unwrap();
        assert!(result.already_finished);
    }

    #[tokio::test]
    async fn error_status_is_a_soft_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ping")
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .create_async()
            .await;

        let client = BrokerClient::new(&server.url(), None, "agent-1");
        assert!(client.ping().await.is_err());
    }
}
