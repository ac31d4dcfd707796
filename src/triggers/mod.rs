//! Trigger resolution for the poll protocol.
//!
//! A poll computes the highest-priority trigger for the calling agent in
//! one read-write transaction, atomically claiming whatever it hands back
//! so no concurrent poller can receive the same resource. The single
//! exception is the pool trigger: it is intentionally unclaimed — workers
//! race through the engine's explicit `claim`, which is the serialization
//! point — so it is returned as a bare count.

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::constants::{INBOX_BATCH_LIMIT, LONG_POLL_INTERVAL_MS, LONG_POLL_MAX_TIMEOUT_MS};
use crate::engine::{claim_assigned, claim_offered};
use crate::models::{Epic, InboxMessage, Task};
use crate::store::channels::claim_mention_channels;
use crate::store::epics::claim_changed_epics;
use crate::store::inbox::claim_unread;
use crate::store::Database;
use crate::{Result, SwarmError};

/// The single structured result of a poll: what the runner should do next.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Trigger {
    TaskOffered {
        task_id: String,
        task: Task,
    },
    TaskAssigned {
        task_id: String,
        task: Task,
    },
    UnreadMentions {
        mentions_count: i64,
        claimed_channels: Vec<String>,
    },
    SlackInboxMessage {
        count: i64,
        messages: Vec<InboxMessage>,
    },
    EpicProgressChanged {
        count: i64,
        epics: Vec<Epic>,
    },
    PoolTasksAvailable {
        count: i64,
    },
}

#[derive(Clone)]
pub struct TriggerResolver {
    db: Database,
}

impl TriggerResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Compute and claim the next trigger for `agent_id`, or return `None`
    /// immediately when there is nothing to do.
    pub async fn next_trigger(&self, agent_id: &str) -> Result<Option<Trigger>> {
        let agent_id = agent_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let is_lead: bool = tx
                    .query_row(
                        "SELECT is_lead FROM agents WHERE id = ?1",
                        rusqlite::params![agent_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| SwarmError::NotFound {
                        entity: "agent",
                        id: agent_id.clone(),
                    })?;

                let trigger = resolve(&tx, &agent_id, is_lead, now)?;

                match &trigger {
                    Some(trigger) => {
                        // Successful delivery resets the idle counter.
                        tx.execute(
                            "UPDATE agents SET empty_poll_count = 0 WHERE id = ?1",
                            rusqlite::params![agent_id],
                        )?;
                        debug!(agent_id = %agent_id, trigger = trigger.kind(), "trigger claimed");
                    }
                    None => {
                        tx.execute(
                            "UPDATE agents SET empty_poll_count = empty_poll_count + 1 \
                             WHERE id = ?1",
                            rusqlite::params![agent_id],
                        )?;
                    }
                }

                tx.commit()?;
                Ok(trigger)
            })
            .await
    }

    /// Long-poll wrapper: a bounded loop of short store polls around
    /// [`Self::next_trigger`]. No transaction is held across the sleeps.
    pub async fn poll(&self, agent_id: &str, timeout_ms: u64) -> Result<Option<Trigger>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.min(LONG_POLL_MAX_TIMEOUT_MS));

        loop {
            if let Some(trigger) = self.next_trigger(agent_id).await? {
                return Ok(Some(trigger));
            }
            if Instant::now() + Duration::from_millis(LONG_POLL_INTERVAL_MS) > deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(LONG_POLL_INTERVAL_MS)).await;
        }
    }
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::TaskOffered { .. } => "task_offered",
            Trigger::TaskAssigned { .. } => "task_assigned",
            Trigger::UnreadMentions { .. } => "unread_mentions",
            Trigger::SlackInboxMessage { .. } => "slack_inbox_message",
            Trigger::EpicProgressChanged { .. } => "epic_progress_changed",
            Trigger::PoolTasksAvailable { .. } => "pool_tasks_available",
        }
    }
}

/// Priority-ordered trigger computation inside the caller's transaction.
fn resolve(
    tx: &rusqlite::Transaction<'_>,
    agent_id: &str,
    is_lead: bool,
    now: i64,
) -> Result<Option<Trigger>> {
    // 1. A task offered to me, claimed into review.
    if let Some(task) = claim_offered(tx, agent_id, now)? {
        return Ok(Some(Trigger::TaskOffered {
            task_id: task.id.clone(),
            task,
        }));
    }

    // 2. My highest-priority pending task, dispatched if I have capacity.
    if let Some(task) = claim_assigned(tx, agent_id, now)? {
        return Ok(Some(Trigger::TaskAssigned {
            task_id: task.id.clone(),
            task,
        }));
    }

    // 3. Channels with unread mentions, held for processing.
    let (mentions_count, claimed_channels) = claim_mention_channels(tx, agent_id, now)?;
    if mentions_count > 0 {
        return Ok(Some(Trigger::UnreadMentions {
            mentions_count,
            claimed_channels,
        }));
    }

    if is_lead {
        // 4a. Unread inbox messages, claimed into processing.
        let messages = claim_unread(tx, agent_id, INBOX_BATCH_LIMIT, now)?;
        if !messages.is_empty() {
            return Ok(Some(Trigger::SlackInboxMessage {
                count: messages.len() as i64,
                messages,
            }));
        }

        // 4b. Epics whose stats changed since last notification.
        let epics = claim_changed_epics(tx, now)?;
        if !epics.is_empty() {
            return Ok(Some(Trigger::EpicProgressChanged {
                count: epics.len() as i64,
                epics,
            }));
        }
    } else {
        // 5. Pool availability, unclaimed by design.
        let count = pool_count(tx)?;
        if count > 0 {
            return Ok(Some(Trigger::PoolTasksAvailable { count }));
        }
    }

    Ok(None)
}

fn pool_count(tx: &rusqlite::Transaction<'_>) -> Result<i64> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM tasks t WHERE t.status = 'unassigned' \
         AND NOT EXISTS (\
            SELECT 1 FROM json_each(t.depends_on) dep \
            JOIN tasks d ON d.id = dep.value \
            WHERE d.status != 'completed')",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
