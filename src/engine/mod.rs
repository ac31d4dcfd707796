//! Task lifecycle engine.
//!
//! Every state transition is a single SQLite transaction: a guarded read
//! (or an UPDATE whose WHERE clause names the expected current status and
//! agent relationship) followed by the write, committing only when exactly
//! one row was affected. Losing a race therefore surfaces as a state
//! violation, never as a double delivery. No other module writes task rows;
//! the trigger resolver claims through the `pub(crate)` helpers at the
//! bottom of this file so its discover-and-claim runs in one transaction
//! too.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Task, TaskContext, TaskSource, TaskStatus};
use crate::store::rows::{TaskRow, TASK_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

/// Arguments for [`TaskEngine::create`].
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub description: String,
    pub source: TaskSource,
    pub created_by: Option<String>,
    /// Direct assignment: the task starts `pending` for this agent.
    pub agent_id: Option<String>,
    /// Offer handshake: the task starts `offered` to this agent.
    pub offered_to: Option<String>,
    /// Park the task in `backlog` until explicitly activated.
    pub backlog: bool,
    pub task_type: Option<String>,
    pub tags: Vec<String>,
    pub priority: Option<i64>,
    pub depends_on: Vec<String>,
    pub context: TaskContext,
    pub epic_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub claude_session_id: Option<String>,
}

impl CreateTask {
    pub fn new(description: impl Into<String>, source: TaskSource) -> Self {
        Self {
            description: description.into(),
            source,
            created_by: None,
            agent_id: None,
            offered_to: None,
            backlog: false,
            task_type: None,
            tags: Vec::new(),
            priority: None,
            depends_on: Vec::new(),
            context: TaskContext::default(),
            epic_id: None,
            parent_task_id: None,
            claude_session_id: None,
        }
    }
}

/// Result of a `finish` call; `already_finished` marks the idempotent
/// no-op on an already-terminal task.
#[derive(Debug, Clone)]
pub struct FinishOutcome {
    pub task: Task,
    pub already_finished: bool,
}

/// Terminal status requested by a `finish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
    Completed,
    Failed,
}

#[derive(Clone)]
pub struct TaskEngine {
    db: Database,
}

impl TaskEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a task. The initial status follows the owner-or-pool policy:
    /// `agent_id` → pending, else `offered_to` → offered, else unassigned
    /// (or backlog when requested).
    pub async fn create(&self, args: CreateTask) -> Result<Task> {
        if args.description.trim().is_empty() {
            return Err(SwarmError::Validation("task description is required".into()));
        }
        if let Some(priority) = args.priority {
            if !(0..=100).contains(&priority) {
                return Err(SwarmError::Validation("priority must be 0..100".into()));
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let task_id = id.clone();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                for dep in &args.depends_on {
                    if load_task(&tx, dep)?.is_none() {
                        return Err(SwarmError::Validation(format!(
                            "dependsOn references unknown task: {dep}"
                        )));
                    }
                }
                if let Some(agent_id) = &args.agent_id {
                    require_agent(&tx, agent_id)?;
                }
                if let Some(offered_to) = &args.offered_to {
                    require_agent(&tx, offered_to)?;
                }

                let (status, offered_at) = if args.backlog {
                    (TaskStatus::Backlog, None)
                } else if args.agent_id.is_some() {
                    (TaskStatus::Pending, None)
                } else if args.offered_to.is_some() {
                    (TaskStatus::Offered, Some(now))
                } else {
                    (TaskStatus::Unassigned, None)
                };

                tx.execute(
                    "INSERT INTO tasks (id, agent_id, created_by, description, status, source, \
                     task_type, tags, priority, depends_on, offered_to, offered_at, \
                     slack_channel_id, slack_thread_ts, slack_user_id, github_repo, \
                     github_issue_number, agentmail_message_id, mention_origin, epic_id, \
                     parent_task_id, claude_session_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?23)",
                    rusqlite::params![
                        id,
                        args.agent_id,
                        args.created_by,
                        args.description,
                        status.as_str(),
                        args.source.as_str(),
                        args.task_type,
                        serde_json::to_string(&args.tags)?,
                        args.priority.unwrap_or(crate::constants::DEFAULT_TASK_PRIORITY),
                        serde_json::to_string(&args.depends_on)?,
                        args.offered_to,
                        offered_at,
                        args.context.slack_channel_id,
                        args.context.slack_thread_ts,
                        args.context.slack_user_id,
                        args.context.github_repo,
                        args.context.github_issue_number,
                        args.context.agentmail_message_id,
                        args.context.mention_origin,
                        args.epic_id,
                        args.parent_task_id,
                        args.claude_session_id,
                        now
                    ],
                )?;

                if let Some(epic_id) = &args.epic_id {
                    bump_epic_stats(&tx, epic_id, now)?;
                }

                let task = load_required(&tx, &id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
            .inspect(|task| info!(task_id = %task_id, status = %task.status, "task created"))
    }

    /// Worker claim of a pool task: `unassigned → pending`.
    ///
    /// This is the serialization point for the pool trigger; when two
    /// workers race, the second UPDATE matches zero rows and fails.
    pub async fn claim(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                require_agent(&tx, &agent_id)?;

                if count_active(&tx, &agent_id)? >= agent_max_tasks(&tx, &agent_id)? {
                    return Err(SwarmError::StateViolation(format!(
                        "agent {agent_id} is at capacity"
                    )));
                }
                if !deps_completed(&tx, &task)? {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} has unresolved dependencies"
                    )));
                }

                let updated = tx.execute(
                    "UPDATE tasks SET status = 'pending', agent_id = ?2, updated_at = ?3 \
                     WHERE id = ?1 AND status = 'unassigned' AND agent_id IS NULL",
                    rusqlite::params![task_id, agent_id, now],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is no longer unassigned (currently {})",
                        task.status
                    )));
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                debug!(task_id = %task.id, agent_id = %agent_id, "pool task claimed");
                Ok(task)
            })
            .await
    }

    /// Accept an offered task: `reviewing → pending` by the offered agent.
    pub async fn accept(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                if task.offered_to.as_deref() != Some(agent_id.as_str()) {
                    return Err(SwarmError::Forbidden(format!(
                        "task {task_id} is not offered to agent {agent_id}"
                    )));
                }

                let updated = tx.execute(
                    "UPDATE tasks SET status = 'pending', agent_id = ?2, accepted_at = ?3, \
                     updated_at = ?3 WHERE id = ?1 AND status = 'reviewing' AND offered_to = ?2",
                    rusqlite::params![task_id, agent_id, now],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is not reviewing (currently {})",
                        task.status
                    )));
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    /// Reject an offered task. With `requeue` the task returns to the pool
    /// with its offer fields cleared; otherwise it fails with the reason.
    pub async fn reject(
        &self,
        task_id: &str,
        agent_id: &str,
        reason: Option<String>,
        requeue: bool,
    ) -> Result<Task> {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                if task.offered_to.as_deref() != Some(agent_id.as_str()) {
                    return Err(SwarmError::Forbidden(format!(
                        "task {task_id} is not offered to agent {agent_id}"
                    )));
                }

                let updated = if requeue {
                    tx.execute(
                        "UPDATE tasks SET status = 'unassigned', agent_id = NULL, \
                         offered_to = NULL, offered_at = NULL, rejection_reason = ?3, \
                         updated_at = ?2 \
                         WHERE id = ?1 AND status = 'reviewing'",
                        rusqlite::params![task_id, now, reason],
                    )?
                } else {
                    tx.execute(
                        "UPDATE tasks SET status = 'failed', rejection_reason = ?3, \
                         failure_reason = COALESCE(?3, 'offer rejected'), finished_at = ?2, \
                         updated_at = ?2 \
                         WHERE id = ?1 AND status = 'reviewing'",
                        rusqlite::params![task_id, now, reason],
                    )?
                };
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is not reviewing (currently {})",
                        task.status
                    )));
                }

                if let Some(epic_id) = &task.epic_id {
                    bump_epic_stats(&tx, epic_id, now)?;
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    /// Promote a backlog task to the pool once its dependencies resolved.
    pub async fn activate(&self, task_id: &str) -> Result<Task> {
        let task_id = task_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                if !deps_completed(&tx, &task)? {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} has unresolved dependencies"
                    )));
                }

                let updated = tx.execute(
                    "UPDATE tasks SET status = 'unassigned', updated_at = ?2 \
                     WHERE id = ?1 AND status = 'backlog'",
                    rusqlite::params![task_id, now],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is not in backlog (currently {})",
                        task.status
                    )));
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    /// Finish a task. Idempotent: finishing an already-terminal task is
    /// accepted and reported via `already_finished` without changing it.
    pub async fn finish(
        &self,
        task_id: &str,
        caller: &str,
        status: FinishStatus,
        output: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<FinishOutcome> {
        let task_id = task_id.to_string();
        let caller = caller.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                if task.status.is_terminal() {
                    tx.commit()?;
                    return Ok(FinishOutcome {
                        task,
                        already_finished: true,
                    });
                }

                // Only the assigned agent may finish; an unassigned task
                // may be finished by its creator.
                let allowed = match &task.agent_id {
                    Some(owner) => owner == &caller,
                    None => task.created_by.as_deref() == Some(caller.as_str()),
                };
                if !allowed {
                    return Err(SwarmError::Forbidden(format!(
                        "agent {caller} may not finish task {task_id}"
                    )));
                }

                let new_status = match status {
                    FinishStatus::Completed => TaskStatus::Completed,
                    FinishStatus::Failed => TaskStatus::Failed,
                };

                let updated = tx.execute(
                    "UPDATE tasks SET status = ?2, output = ?3, failure_reason = ?4, \
                     finished_at = ?5, updated_at = ?5 \
                     WHERE id = ?1 AND status NOT IN ('completed','failed','cancelled')",
                    rusqlite::params![task_id, new_status.as_str(), output, failure_reason, now],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} changed state during finish"
                    )));
                }

                if let Some(owner) = &task.agent_id {
                    recompute_agent_status(&tx, owner, now)?;
                }
                if let Some(epic_id) = &task.epic_id {
                    bump_epic_stats(&tx, epic_id, now)?;
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                info!(task_id = %task.id, status = %task.status, "task finished");
                Ok(FinishOutcome {
                    task,
                    already_finished: false,
                })
            })
            .await
    }

    /// Pause an in-progress task, preserving its progress text. An updated
    /// progress note may be recorded as part of the pause.
    pub async fn pause(
        &self,
        task_id: &str,
        caller: &str,
        progress: Option<String>,
    ) -> Result<Task> {
        let task_id = task_id.to_string();
        let caller = caller.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                require_owner(&task, &caller, "pause")?;

                let updated = tx.execute(
                    "UPDATE tasks SET status = 'paused', progress = COALESCE(?3, progress), \
                     updated_at = ?2 \
                     WHERE id = ?1 AND status = 'in_progress' AND agent_id = ?4",
                    rusqlite::params![task_id, now, progress, caller],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is not in progress (currently {})",
                        task.status
                    )));
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    /// Resume a paused task: `paused → in_progress`, capacity permitting.
    pub async fn resume(&self, task_id: &str, caller: &str) -> Result<Task> {
        let task_id = task_id.to_string();
        let caller = caller.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                require_owner(&task, &caller, "resume")?;

                if count_in_progress(&tx, &caller)? >= agent_max_tasks(&tx, &caller)? {
                    return Err(SwarmError::StateViolation(format!(
                        "agent {caller} is at capacity"
                    )));
                }

                let updated = tx.execute(
                    "UPDATE tasks SET status = 'in_progress', updated_at = ?2 \
                     WHERE id = ?1 AND status = 'paused' AND agent_id = ?3",
                    rusqlite::params![task_id, now, caller],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is not paused (currently {})",
                        task.status
                    )));
                }

                recompute_agent_status(&tx, &caller, now)?;

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    /// Cancel any non-terminal task. Allowed for the lead or the creator.
    /// Enforcement is cooperative: the running child observes the status
    /// through the cancelled-tasks hook.
    pub async fn cancel(&self, task_id: &str, caller: &str, reason: Option<String>) -> Result<Task> {
        let task_id = task_id.to_string();
        let caller = caller.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let task = load_required(&tx, &task_id)?;
                if task.status.is_terminal() {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} is already terminal ({})",
                        task.status
                    )));
                }

                let caller_is_lead: bool = tx
                    .query_row(
                        "SELECT is_lead FROM agents WHERE id = ?1",
                        rusqlite::params![caller],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(false);
                let caller_is_creator = task.created_by.as_deref() == Some(caller.as_str());
                if !caller_is_lead && !caller_is_creator {
                    return Err(SwarmError::Forbidden(format!(
                        "agent {caller} may not cancel task {task_id}"
                    )));
                }

                let updated = tx.execute(
                    "UPDATE tasks SET status = 'cancelled', \
                     failure_reason = COALESCE(?3, 'cancelled'), finished_at = ?2, \
                     updated_at = ?2 \
                     WHERE id = ?1 AND status NOT IN ('completed','failed','cancelled')",
                    rusqlite::params![task_id, now, reason],
                )?;
                if updated != 1 {
                    return Err(SwarmError::StateViolation(format!(
                        "task {task_id} changed state during cancel"
                    )));
                }

                if let Some(owner) = &task.agent_id {
                    recompute_agent_status(&tx, owner, now)?;
                }
                if let Some(epic_id) = &task.epic_id {
                    bump_epic_stats(&tx, epic_id, now)?;
                }

                let task = load_required(&tx, &task_id)?;
                tx.commit()?;
                info!(task_id = %task.id, "task cancelled");
                Ok(task)
            })
            .await
    }
}

// ── transaction helpers ──────────────────────────────────────────────
//
// Shared by the engine operations above and by the trigger resolver,
// which must claim inside its own discovery transaction.

pub(crate) fn load_task(tx: &Transaction<'_>, id: &str) -> Result<Option<Task>> {
    let row = tx
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            rusqlite::params![id],
            TaskRow::map,
        )
        .optional()?;
    row.map(|r| r.into_task()).transpose()
}

pub(crate) fn load_required(tx: &Transaction<'_>, id: &str) -> Result<Task> {
    load_task(tx, id)?.ok_or_else(|| SwarmError::NotFound {
        entity: "task",
        id: id.to_string(),
    })
}

fn require_agent(tx: &Transaction<'_>, id: &str) -> Result<()> {
    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM agents WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(SwarmError::NotFound {
            entity: "agent",
            id: id.to_string(),
        });
    }
    Ok(())
}

fn require_owner(task: &Task, caller: &str, what: &str) -> Result<()> {
    if task.agent_id.as_deref() != Some(caller) {
        return Err(SwarmError::Forbidden(format!(
            "agent {caller} may not {what} task {}",
            task.id
        )));
    }
    Ok(())
}

pub(crate) fn agent_max_tasks(tx: &Transaction<'_>, agent_id: &str) -> Result<i64> {
    tx.query_row(
        "SELECT max_tasks FROM agents WHERE id = ?1",
        rusqlite::params![agent_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| SwarmError::NotFound {
        entity: "agent",
        id: agent_id.to_string(),
    })
}

pub(crate) fn count_in_progress(tx: &Transaction<'_>, agent_id: &str) -> Result<i64> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM tasks WHERE agent_id = ?1 AND status = 'in_progress'",
        rusqlite::params![agent_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn count_active(tx: &Transaction<'_>, agent_id: &str) -> Result<i64> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM tasks WHERE agent_id = ?1 \
         AND status IN ('offered','reviewing','pending','in_progress')",
        rusqlite::params![agent_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn deps_completed(tx: &Transaction<'_>, task: &Task) -> Result<bool> {
    for dep in &task.depends_on {
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1",
                rusqlite::params![dep],
                |row| row.get(0),
            )
            .optional()?;
        if status.as_deref() != Some("completed") {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Busy while anything is executing, idle otherwise. Offline agents are
/// left alone — only a registration or ping brings them back.
pub(crate) fn recompute_agent_status(
    tx: &Transaction<'_>,
    agent_id: &str,
    now: i64,
) -> Result<()> {
    let in_progress = count_in_progress(tx, agent_id)?;
    let new_status = if in_progress > 0 { "busy" } else { "idle" };
    tx.execute(
        "UPDATE agents SET status = ?2, updated_at = ?3 \
         WHERE id = ?1 AND status != 'offline'",
        rusqlite::params![agent_id, new_status, now],
    )?;
    Ok(())
}

/// Record that an epic's task stats changed, so the lead trigger fires.
pub(crate) fn bump_epic_stats(tx: &Transaction<'_>, epic_id: &str, now: i64) -> Result<()> {
    tx.execute(
        "UPDATE epics SET stats_changed_at = ?2, updated_at = ?2 WHERE id = ?1",
        rusqlite::params![epic_id, now],
    )?;
    Ok(())
}

/// Claim the oldest task offered to `agent_id`: `offered → reviewing`.
/// Runs inside the resolver's transaction.
pub(crate) fn claim_offered(tx: &Transaction<'_>, agent_id: &str, now: i64) -> Result<Option<Task>> {
    let id: Option<String> = tx
        .query_row(
            "SELECT id FROM tasks WHERE status = 'offered' AND offered_to = ?1 \
             ORDER BY offered_at ASC LIMIT 1",
            rusqlite::params![agent_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = id else { return Ok(None) };

    let updated = tx.execute(
        "UPDATE tasks SET status = 'reviewing', updated_at = ?2 \
         WHERE id = ?1 AND status = 'offered' AND offered_to = ?3",
        rusqlite::params![id, now, agent_id],
    )?;
    if updated != 1 {
        // Lost the race inside our own snapshot; treat as nothing to claim.
        return Ok(None);
    }
    load_task(tx, &id)
}

/// Dispatch the highest-priority pending task owned by `agent_id`:
/// `pending → in_progress`, capacity and dependencies permitting.
/// Runs inside the resolver's transaction.
pub(crate) fn claim_assigned(
    tx: &Transaction<'_>,
    agent_id: &str,
    now: i64,
) -> Result<Option<Task>> {
    let max_tasks = agent_max_tasks(tx, agent_id)?;
    if count_in_progress(tx, agent_id)? >= max_tasks {
        return Ok(None);
    }

    let id: Option<String> = tx
        .query_row(
            "SELECT t.id FROM tasks t \
             WHERE t.status = 'pending' AND t.agent_id = ?1 \
             AND NOT EXISTS (\
                SELECT 1 FROM json_each(t.depends_on) dep \
                JOIN tasks d ON d.id = dep.value \
                WHERE d.status != 'completed') \
             ORDER BY t.priority DESC, t.created_at ASC LIMIT 1",
            rusqlite::params![agent_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = id else { return Ok(None) };

    let updated = tx.execute(
        "UPDATE tasks SET status = 'in_progress', updated_at = ?2 \
         WHERE id = ?1 AND status = 'pending' AND agent_id = ?3",
        rusqlite::params![id, now, agent_id],
    )?;
    if updated != 1 {
        return Ok(None);
    }

    recompute_agent_status(tx, agent_id, now)?;
    load_task(tx, &id)
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
