//! Request and response bodies for the broker HTTP surface.

use serde::{Deserialize, Serialize};

use crate::models::{Agent, AgentIdentity, InboxMessage, Task};
use crate::triggers::Trigger;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_lead: bool,
    pub role: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub max_tasks: Option<i64>,
    pub identity: Option<AgentIdentity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapacityInfo {
    pub current: i64,
    pub max: i64,
    pub available: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub agent: Agent,
    pub capacity: CapacityInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox: Option<InboxSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxSummary {
    pub unread_count: i64,
    pub recent: Vec<InboxMessage>,
}

#[derive(Debug, Deserialize)]
pub struct MeQuery {
    pub include: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    /// Accepted for wire compatibility; claims make a cursor unnecessary.
    #[allow(dead_code)]
    pub since: Option<i64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub trigger: Option<Trigger>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub description: String,
    pub source: Option<String>,
    pub agent_id: Option<String>,
    pub offered_to: Option<String>,
    #[serde(default)]
    pub backlog: bool,
    pub task_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: Option<i64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub epic_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub claude_session_id: Option<String>,
    pub slack_channel_id: Option<String>,
    pub slack_thread_ts: Option<String>,
    pub slack_user_id: Option<String>,
    pub github_repo: Option<String>,
    pub github_issue_number: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishTaskRequest {
    pub status: String,
    pub output: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishTaskResponse {
    #[serde(flatten)]
    pub task: Task,
    pub already_finished: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct PauseTaskRequest {
    pub progress: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct RejectTaskRequest {
    pub reason: Option<String>,
    /// Default true: the task returns to the pool instead of failing.
    pub requeue: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CancelTaskRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledQuery {
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelledResponse {
    pub cancelled: Vec<CancelledTask>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledTask {
    pub id: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxStatusRequest {
    pub status: String,
    pub response_text: Option<String>,
    pub delegated_to_task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogsRequest {
    pub session_id: String,
    pub iteration: i64,
    pub task_id: Option<String>,
    pub cli: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCostRequest {
    pub session_id: String,
    pub iteration: i64,
    pub task_id: Option<String>,
    pub cost_usd: f64,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    pub cache_read_tokens: Option<i64>,
    pub cache_creation_tokens: Option<i64>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub is_dm: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub content: String,
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Set when a human posts through the dashboard without an agent id.
    #[serde(default)]
    pub as_human: bool,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEpicRequest {
    pub name: String,
    pub goal: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct UpdateEpicRequest {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServiceRequest {
    pub name: String,
    pub port: i64,
    pub script: Option<String>,
    pub health_path: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesQuery {
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepoRequest {
    pub name: String,
    pub url: String,
    pub default_branch: Option<String>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetConfigRequest {
    pub scope: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigsQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub imported: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub ok: bool,
}
