//! Inbox routing: turning external events into tasks or inbox messages.
//!
//! An event that explicitly addresses the bot while a lead is online
//! becomes a task assigned to the lead. Everything else becomes a pool
//! task — unless nobody is online, in which case it is parked in the
//! lead's inbox (or, with no lead at all, queued as an unassigned task).
//! Duplicate suppression runs before any task is created.

pub mod dedup;

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::engine::{CreateTask, TaskEngine};
use crate::models::{
    AgentStatus, IncomingEvent, InboxMessage, Task, TaskContext,
};
use crate::store::inbox::CreateInboxMessage;
use crate::store::{AgentStore, InboxStore, TaskStore};
use crate::Result;

pub use dedup::{find_duplicate_task, jaccard, DuplicateMatch, TaskProbe};

/// What the router did with an event.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    TaskCreated(Task),
    InboxMessageCreated(InboxMessage),
    Duplicate { task_id: String, reason: String },
    /// Nothing useful could be derived from the event.
    Ignored,
}

#[derive(Clone)]
pub struct InboxRouter {
    engine: TaskEngine,
    agents: AgentStore,
    inbox: InboxStore,
    tasks: TaskStore,
}

impl InboxRouter {
    pub fn new(
        engine: TaskEngine,
        agents: AgentStore,
        inbox: InboxStore,
        tasks: TaskStore,
    ) -> Self {
        Self {
            engine,
            agents,
            inbox,
            tasks,
        }
    }

    pub async fn route(&self, event: IncomingEvent) -> Result<RouteOutcome> {
        let description = derive_description(&event.text);
        if description.is_empty() && !event.mentions_bot {
            debug!(source = event.source.as_str(), "event carried no usable text");
            return Ok(RouteOutcome::Ignored);
        }

        let lead = self.agents.find_lead().await?;
        let lead_online = lead
            .as_ref()
            .map(|l| l.status != AgentStatus::Offline)
            .unwrap_or(false);
        let worker_online = self.agents.any_online_worker().await?;

        // Dedup before any task creation, keyed on the creator we would
        // record — the lead when one exists.
        if let Some(lead) = &lead {
            let probe = TaskProbe {
                description: description.clone(),
                slack_channel_id: event.slack_channel_id.clone(),
                slack_thread_ts: event.slack_thread_ts.clone(),
                target_agent_id: event.target_agent_id.clone(),
            };
            if let Some(found) = find_duplicate_task(&self.tasks, &lead.id, &probe).await? {
                info!(
                    task_id = %found.task.id,
                    reason = %found.reason,
                    "suppressed duplicate event"
                );
                return Ok(RouteOutcome::Duplicate {
                    task_id: found.task.id,
                    reason: found.reason,
                });
            }
        }

        // A direct directive to the lead.
        if event.mentions_bot && lead_online {
            let lead = lead.as_ref().expect("lead_online implies lead");
            if !description.is_empty() {
                let task = self
                    .create_task(&event, description, Some(lead.id.clone()), Some(lead.id.clone()))
                    .await?;
                return Ok(RouteOutcome::TaskCreated(task));
            }
            // Empty directive: record it for the lead to look at.
            return self.queue_inbox(&event, lead.id.clone()).await;
        }

        // Nobody to work it right now.
        if !lead_online && !worker_online {
            return match &lead {
                Some(lead) => self.queue_inbox(&event, lead.id.clone()).await,
                None => {
                    let task = self
                        .create_task(&event, description, event.target_agent_id.clone(), None)
                        .await?;
                    Ok(RouteOutcome::TaskCreated(task))
                }
            };
        }

        // Normal path: a pool task, pinned only when a rule targeted an agent.
        let task = self
            .create_task(
                &event,
                description,
                event.target_agent_id.clone(),
                lead.map(|l| l.id),
            )
            .await?;
        Ok(RouteOutcome::TaskCreated(task))
    }

    async fn create_task(
        &self,
        event: &IncomingEvent,
        description: String,
        agent_id: Option<String>,
        created_by: Option<String>,
    ) -> Result<Task> {
        let mut args = CreateTask::new(description, event.source);
        args.agent_id = agent_id;
        args.created_by = created_by;
        args.context = TaskContext {
            slack_channel_id: event.slack_channel_id.clone(),
            slack_thread_ts: event.slack_thread_ts.clone(),
            slack_user_id: event.slack_user_id.clone(),
            mention_origin: event.mentions_bot.then(|| event.text.clone()),
            ..Default::default()
        };
        self.engine.create(args).await
    }

    async fn queue_inbox(&self, event: &IncomingEvent, lead_id: String) -> Result<RouteOutcome> {
        let message = self
            .inbox
            .create(CreateInboxMessage {
                agent_id: lead_id,
                content: event.text.clone(),
                source: event.source,
                slack_channel_id: event.slack_channel_id.clone(),
                slack_thread_ts: event.slack_thread_ts.clone(),
                slack_user_id: event.slack_user_id.clone(),
                matched_text: event.mentions_bot.then(|| event.text.clone()),
            })
            .await?;
        Ok(RouteOutcome::InboxMessageCreated(message))
    }
}

/// Strip chat mention markup (`<@U123>` and leading `@name` tokens) and
/// collapse whitespace, leaving the actionable request text.
pub fn derive_description(text: &str) -> String {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    let mention =
        MENTION.get_or_init(|| Regex::new(r"<@[A-Za-z0-9_]+>|^\s*@\S+").expect("static pattern"));
    let stripped = mention.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
