use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::DEFAULT_TASK_PRIORITY;

/// Lifecycle states of a task.
///
/// `Completed`, `Failed` and `Cancelled` are terminal; every other state
/// can still move. Stored as snake_case text in SQLite and on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Unassigned,
    Offered,
    Reviewing,
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Unassigned => "unassigned",
            TaskStatus::Offered => "offered",
            TaskStatus::Reviewing => "reviewing",
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(TaskStatus::Backlog),
            "unassigned" => Ok(TaskStatus::Unassigned),
            "offered" => Ok(TaskStatus::Offered),
            "reviewing" => Ok(TaskStatus::Reviewing),
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

/// Where a task originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Mcp,
    Slack,
    Api,
    Github,
    Agentmail,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Mcp => "mcp",
            TaskSource::Slack => "slack",
            TaskSource::Api => "api",
            TaskSource::Github => "github",
            TaskSource::Agentmail => "agentmail",
        }
    }
}

impl FromStr for TaskSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcp" => Ok(TaskSource::Mcp),
            "slack" => Ok(TaskSource::Slack),
            "api" => Ok(TaskSource::Api),
            "github" => Ok(TaskSource::Github),
            "agentmail" => Ok(TaskSource::Agentmail),
            _ => Err(format!("Unknown task source: {s}")),
        }
    }
}

/// External context carried by a task created from an integration event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub slack_channel_id: Option<String>,
    pub slack_thread_ts: Option<String>,
    pub slack_user_id: Option<String>,
    pub github_repo: Option<String>,
    pub github_issue_number: Option<i64>,
    pub agentmail_message_id: Option<String>,
    /// Raw text of the mention that produced this task, if any.
    pub mention_origin: Option<String>,
}

/// A unit of work, subject to the lifecycle state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Owning agent, set once the task is pending or later.
    pub agent_id: Option<String>,
    /// Agent that created the task, if any.
    pub created_by: Option<String>,
    pub description: String,
    pub status: TaskStatus,
    pub source: TaskSource,
    pub task_type: Option<String>,
    pub tags: Vec<String>,
    /// 0..100, higher is more urgent.
    pub priority: i64,
    /// Task ids that must complete before this one may be claimed.
    pub depends_on: Vec<String>,
    pub offered_to: Option<String>,
    pub offered_at: Option<i64>,
    pub accepted_at: Option<i64>,
    pub rejection_reason: Option<String>,
    pub output: Option<String>,
    pub failure_reason: Option<String>,
    /// Free-text progress note, preserved across pause/resume.
    pub progress: Option<String>,
    pub context: TaskContext,
    pub epic_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub claude_session_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
    pub notified_at: Option<i64>,
}

impl Task {
    /// Build an unsaved task with defaults; the engine decides the initial
    /// status from the owner/offer arguments at insert time.
    pub fn new(description: impl Into<String>, source: TaskSource, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: None,
            created_by: None,
            description: description.into(),
            status: TaskStatus::Unassigned,
            source,
            task_type: None,
            tags: Vec::new(),
            priority: DEFAULT_TASK_PRIORITY,
            depends_on: Vec::new(),
            offered_to: None,
            offered_at: None,
            accepted_at: None,
            rejection_reason: None,
            output: None,
            failure_reason: None,
            progress: None,
            context: TaskContext::default(),
            epic_id: None,
            parent_task_id: None,
            claude_session_id: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
            notified_at: None,
        }
    }
}

/// Observable availability of an agent, driven by capacity and pings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        }
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Unknown agent status: {s}")),
        }
    }
}

/// Persisted identity blobs for an agent. Five free-text fields, each
/// capped at 64 KiB, carried verbatim between runner restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub persona: Option<String>,
    pub instructions: Option<String>,
    pub context_notes: Option<String>,
    pub memory_summary: Option<String>,
    pub scratchpad: Option<String>,
}

/// A long-running autonomous CLI agent registered with the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    /// Display name, unique case-insensitively.
    pub name: String,
    pub is_lead: bool,
    pub status: AgentStatus,
    pub role: Option<String>,
    pub capabilities: Vec<String>,
    /// Concurrency cap for in-progress tasks.
    pub max_tasks: i64,
    pub identity: AgentIdentity,
    /// Consecutive polls that returned no trigger.
    pub empty_poll_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Status of a lead-facing inbox message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Unread,
    Processing,
    Read,
    Responded,
    Delegated,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Unread => "unread",
            InboxStatus::Processing => "processing",
            InboxStatus::Read => "read",
            InboxStatus::Responded => "responded",
            InboxStatus::Delegated => "delegated",
        }
    }
}

impl FromStr for InboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(InboxStatus::Unread),
            "processing" => Ok(InboxStatus::Processing),
            "read" => Ok(InboxStatus::Read),
            "responded" => Ok(InboxStatus::Responded),
            "delegated" => Ok(InboxStatus::Delegated),
            _ => Err(format!("Unknown inbox status: {s}")),
        }
    }
}

/// An external chat event recorded for the lead, not (yet) a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub id: String,
    /// The lead agent that owns this message.
    pub agent_id: String,
    pub content: String,
    pub source: TaskSource,
    pub status: InboxStatus,
    pub slack_channel_id: Option<String>,
    pub slack_thread_ts: Option<String>,
    pub slack_user_id: Option<String>,
    pub matched_text: Option<String>,
    pub delegated_to_task_id: Option<String>,
    pub response_text: Option<String>,
    /// When the trigger resolver claimed this message for processing.
    pub processing_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An internal chat channel, public or DM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub is_dm: bool,
    /// Agent currently holding this channel for mention processing.
    pub processing_by: Option<String>,
    pub processing_until: Option<i64>,
    pub created_at: i64,
}

/// A message within an internal channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: i64,
    pub channel_id: String,
    /// None when the author is a human via the dashboard.
    pub author_agent_id: Option<String>,
    pub content: String,
    pub reply_to_id: Option<i64>,
    /// Agent ids explicitly mentioned in the message.
    pub mentions: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl EpicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpicStatus::Draft => "draft",
            EpicStatus::Active => "active",
            EpicStatus::Paused => "paused",
            EpicStatus::Completed => "completed",
            EpicStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for EpicStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EpicStatus::Draft),
            "active" => Ok(EpicStatus::Active),
            "paused" => Ok(EpicStatus::Paused),
            "completed" => Ok(EpicStatus::Completed),
            "cancelled" => Ok(EpicStatus::Cancelled),
            _ => Err(format!("Unknown epic status: {s}")),
        }
    }
}

/// A named container of tasks with a computed progress percentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epic {
    pub id: String,
    pub name: String,
    pub goal: Option<String>,
    pub status: EpicStatus,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    /// completed ÷ total, 0.0 when the epic has no tasks.
    pub progress: f64,
    /// When a member task last changed status.
    pub stats_changed_at: Option<i64>,
    /// When the lead was last told about a stats change.
    pub notified_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A service an agent exposes for artifact/service discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub port: i64,
    pub script: Option<String>,
    pub status: String,
    pub health_path: Option<String>,
    pub url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A source repository known to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub default_branch: String,
    pub agent_id: Option<String>,
    pub created_at: i64,
}

/// Append-only cost record for one child-process session iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCost {
    pub id: i64,
    pub session_id: String,
    pub iteration: i64,
    pub task_id: Option<String>,
    pub cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: Option<i64>,
    pub cache_creation_tokens: Option<i64>,
    pub model: Option<String>,
    pub created_at: i64,
}

/// Append-only batch of child stdout lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLog {
    pub id: i64,
    pub session_id: String,
    pub iteration: i64,
    pub task_id: Option<String>,
    pub cli: String,
    pub lines: Vec<String>,
    pub created_at: i64,
}

/// A stored `(scope, key, value)` configuration entry, imported into the
/// broker's process environment at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub scope: String,
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

/// Uniform shape of an event delivered by an integration webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    pub source: TaskSource,
    pub author: String,
    pub text: String,
    /// Stable thread coordinates, e.g. a Slack `(channel, thread_ts)` pair.
    pub slack_channel_id: Option<String>,
    pub slack_thread_ts: Option<String>,
    pub slack_user_id: Option<String>,
    /// True when the event explicitly mentions the bot.
    pub mentions_bot: bool,
    /// Agent the event pins the work to, when a routing rule matched one.
    pub target_agent_id: Option<String>,
    pub raw_context: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_round_trips_through_str() {
        for status in [
            TaskStatus::Backlog,
            TaskStatus::Unassigned,
            TaskStatus::Offered,
            TaskStatus::Reviewing,
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Reviewing.is_terminal());
    }

    #[test]
    fn task_new_applies_defaults() {
        let task = Task::new("ship the release", TaskSource::Api, 1_000);
        assert_eq!(task.status, TaskStatus::Unassigned);
        assert_eq!(task.priority, 50);
        assert!(task.agent_id.is_none());
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
