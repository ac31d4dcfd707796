//! Row → model mapping shared by the stores and the engine.
//!
//! Each entity has a canonical column list used by every SELECT, a raw row
//! struct that keeps the `rusqlite` mapping closure infallible, and a
//! conversion step where JSON columns and status strings are parsed and
//! can fail with a typed error.

use anyhow::anyhow;
use rusqlite::Row;

use crate::models::{
    Agent, AgentIdentity, Channel, ChannelMessage, InboxMessage, Repo, Service, Task, TaskContext,
};
use crate::{Result, SwarmError};

// ── tasks ────────────────────────────────────────────────────────────

pub const TASK_COLUMNS: &str = "id, agent_id, created_by, description, status, source, task_type, \
     tags, priority, depends_on, offered_to, offered_at, accepted_at, rejection_reason, \
     output, failure_reason, progress, slack_channel_id, slack_thread_ts, slack_user_id, \
     github_repo, github_issue_number, agentmail_message_id, mention_origin, epic_id, \
     parent_task_id, claude_session_id, created_at, updated_at, finished_at, notified_at";

pub struct TaskRow {
    id: String,
    agent_id: Option<String>,
    created_by: Option<String>,
    description: String,
    status: String,
    source: String,
    task_type: Option<String>,
    tags: String,
    priority: i64,
    depends_on: String,
    offered_to: Option<String>,
    offered_at: Option<i64>,
    accepted_at: Option<i64>,
    rejection_reason: Option<String>,
    output: Option<String>,
    failure_reason: Option<String>,
    progress: Option<String>,
    slack_channel_id: Option<String>,
    slack_thread_ts: Option<String>,
    slack_user_id: Option<String>,
    github_repo: Option<String>,
    github_issue_number: Option<i64>,
    agentmail_message_id: Option<String>,
    mention_origin: Option<String>,
    epic_id: Option<String>,
    parent_task_id: Option<String>,
    claude_session_id: Option<String>,
    created_at: i64,
    updated_at: i64,
    finished_at: Option<i64>,
    notified_at: Option<i64>,
}

impl TaskRow {
    pub fn map(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            created_by: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            source: row.get(5)?,
            task_type: row.get(6)?,
            tags: row.get(7)?,
            priority: row.get(8)?,
            depends_on: row.get(9)?,
            offered_to: row.get(10)?,
            offered_at: row.get(11)?,
            accepted_at: row.get(12)?,
            rejection_reason: row.get(13)?,
            output: row.get(14)?,
            failure_reason: row.get(15)?,
            progress: row.get(16)?,
            slack_channel_id: row.get(17)?,
            slack_thread_ts: row.get(18)?,
            slack_user_id: row.get(19)?,
            github_repo: row.get(20)?,
            github_issue_number: row.get(21)?,
            agentmail_message_id: row.get(22)?,
            mention_origin: row.get(23)?,
            epic_id: row.get(24)?,
            parent_task_id: row.get(25)?,
            claude_session_id: row.get(26)?,
            created_at: row.get(27)?,
            updated_at: row.get(28)?,
            finished_at: row.get(29)?,
            notified_at: row.get(30)?,
        })
    }

    pub fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            agent_id: self.agent_id,
            created_by: self.created_by,
            description: self.description,
            status: parse_enum(&self.status, "task status")?,
            source: parse_enum(&self.source, "task source")?,
            task_type: self.task_type,
            tags: serde_json::from_str(&self.tags)?,
            priority: self.priority,
            depends_on: serde_json::from_str(&self.depends_on)?,
            offered_to: self.offered_to,
            offered_at: self.offered_at,
            accepted_at: self.accepted_at,
            rejection_reason: self.rejection_reason,
            output: self.output,
            failure_reason: self.failure_reason,
            progress: self.progress,
            context: TaskContext {
                slack_channel_id: self.slack_channel_id,
                slack_thread_ts: self.slack_thread_ts,
                slack_user_id: self.slack_user_id,
                github_repo: self.github_repo,
                github_issue_number: self.github_issue_number,
                agentmail_message_id: self.agentmail_message_id,
                mention_origin: self.mention_origin,
            },
            epic_id: self.epic_id,
            parent_task_id: self.parent_task_id,
            claude_session_id: self.claude_session_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
            notified_at: self.notified_at,
        })
    }
}

// ── agents ───────────────────────────────────────────────────────────

pub const AGENT_COLUMNS: &str = "id, name, is_lead, status, role, capabilities, max_tasks, \
     persona, instructions, context_notes, memory_summary, scratchpad, \
     empty_poll_count, created_at, updated_at";

pub struct AgentRow {
    id: String,
    name: String,
    is_lead: bool,
    status: String,
    role: Option<String>,
    capabilities: String,
    max_tasks: i64,
    persona: Option<String>,
    instructions: Option<String>,
    context_notes: Option<String>,
    memory_summary: Option<String>,
    scratchpad: Option<String>,
    empty_poll_count: i64,
    created_at: i64,
    updated_at: i64,
}

impl AgentRow {
    pub fn map(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_lead: row.get(2)?,
            status: row.get(3)?,
            role: row.get(4)?,
            capabilities: row.get(5)?,
            max_tasks: row.get(6)?,
            persona: row.get(7)?,
            instructions: row.get(8)?,
            context_notes: row.get(9)?,
            memory_summary: row.get(10)?,
            scratchpad: row.get(11)?,
            empty_poll_count: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    pub fn into_agent(self) -> Result<Agent> {
        Ok(Agent {
            id: self.id,
            name: self.name,
            is_lead: self.is_lead,
            status: parse_enum(&self.status, "agent status")?,
            role: self.role,
            capabilities: serde_json::from_str(&self.capabilities)?,
            max_tasks: self.max_tasks,
            identity: AgentIdentity {
                persona: self.persona,
                instructions: self.instructions,
                context_notes: self.context_notes,
                memory_summary: self.memory_summary,
                scratchpad: self.scratchpad,
            },
            empty_poll_count: self.empty_poll_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── inbox messages ───────────────────────────────────────────────────

pub const INBOX_COLUMNS: &str = "id, agent_id, content, source, status, slack_channel_id, \
     slack_thread_ts, slack_user_id, matched_text, delegated_to_task_id, response_text, \
     processing_at, created_at, updated_at";

pub struct InboxRow {
    id: String,
    agent_id: String,
    content: String,
    source: String,
    status: String,
    slack_channel_id: Option<String>,
    slack_thread_ts: Option<String>,
    slack_user_id: Option<String>,
    matched_text: Option<String>,
    delegated_to_task_id: Option<String>,
    response_text: Option<String>,
    processing_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl InboxRow {
    pub fn map(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            content: row.get(2)?,
            source: row.get(3)?,
            status: row.get(4)?,
            slack_channel_id: row.get(5)?,
            slack_thread_ts: row.get(6)?,
            slack_user_id: row.get(7)?,
            matched_text: row.get(8)?,
            delegated_to_task_id: row.get(9)?,
            response_text: row.get(10)?,
            processing_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    pub fn into_message(self) -> Result<InboxMessage> {
        Ok(InboxMessage {
            id: self.id,
            agent_id: self.agent_id,
            content: self.content,
            source: parse_enum(&self.source, "inbox source")?,
            status: parse_enum(&self.status, "inbox status")?,
            slack_channel_id: self.slack_channel_id,
            slack_thread_ts: self.slack_thread_ts,
            slack_user_id: self.slack_user_id,
            matched_text: self.matched_text,
            delegated_to_task_id: self.delegated_to_task_id,
            response_text: self.response_text,
            processing_at: self.processing_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── channels ─────────────────────────────────────────────────────────

pub const CHANNEL_COLUMNS: &str =
    "id, name, is_dm, processing_by, processing_until, created_at";

pub fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        is_dm: row.get(2)?,
        processing_by: row.get(3)?,
        processing_until: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub const CHANNEL_MESSAGE_COLUMNS: &str =
    "id, channel_id, author_agent_id, content, reply_to_id, mentions, created_at";

pub struct ChannelMessageRow {
    id: i64,
    channel_id: String,
    author_agent_id: Option<String>,
    content: String,
    reply_to_id: Option<i64>,
    mentions: String,
    created_at: i64,
}

impl ChannelMessageRow {
    pub fn map(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            author_agent_id: row.get(2)?,
            content: row.get(3)?,
            reply_to_id: row.get(4)?,
            mentions: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    pub fn into_message(self) -> Result<ChannelMessage> {
        Ok(ChannelMessage {
            id: self.id,
            channel_id: self.channel_id,
            author_agent_id: self.author_agent_id,
            content: self.content,
            reply_to_id: self.reply_to_id,
            mentions: serde_json::from_str(&self.mentions)?,
            created_at: self.created_at,
        })
    }
}

// ── services / repos ─────────────────────────────────────────────────

pub const SERVICE_COLUMNS: &str =
    "id, agent_id, name, port, script, status, health_path, url, created_at, updated_at";

pub fn service_from_row(row: &Row) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        port: row.get(3)?,
        script: row.get(4)?,
        status: row.get(5)?,
        health_path: row.get(6)?,
        url: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub const REPO_COLUMNS: &str = "id, name, url, default_branch, agent_id, created_at";

pub fn repo_from_row(row: &Row) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        default_branch: row.get(3)?,
        agent_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── helpers ──────────────────────────────────────────────────────────

fn parse_enum<T: std::str::FromStr<Err = String>>(value: &str, what: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|e| SwarmError::Internal(anyhow!("corrupt {what} column: {e}")))
}
