//! Agent registration and status upkeep.
//!
//! Registration is an upsert: re-registering an existing id flips an
//! offline agent back to idle, applies any newly supplied settings, and
//! resets the empty-poll counter. Agents are never hard-deleted.

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::debug;
use uuid::Uuid;

use crate::constants::IDENTITY_BLOB_MAX_BYTES;
use crate::models::{Agent, AgentIdentity, AgentStatus};
use crate::store::rows::{AgentRow, AGENT_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

/// Arguments for [`AgentStore::register`].
#[derive(Debug, Clone, Default)]
pub struct RegisterAgent {
    pub id: Option<String>,
    pub name: String,
    pub is_lead: bool,
    pub role: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub max_tasks: Option<i64>,
    pub identity: Option<AgentIdentity>,
}

#[derive(Clone)]
pub struct AgentStore {
    db: Database,
}

impl AgentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent register/upsert. Returns the stored agent.
    pub async fn register(&self, args: RegisterAgent) -> Result<Agent> {
        if args.name.trim().is_empty() {
            return Err(SwarmError::Validation("agent name is required".into()));
        }
        if let Some(identity) = &args.identity {
            validate_identity(identity)?;
        }

        let id = args.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().timestamp();

        let stored_id = id.clone();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let existing: Option<String> = tx
                    .query_row(
                        "SELECT status FROM agents WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match existing {
                    Some(status) => {
                        // Offline agents come back as idle; other statuses
                        // are capacity-driven and left alone.
                        if status == "offline" {
                            tx.execute(
                                "UPDATE agents SET status = 'idle', updated_at = ?2 WHERE id = ?1",
                                rusqlite::params![id, now],
                            )?;
                        }
                        if let Some(max_tasks) = args.max_tasks {
                            tx.execute(
                                "UPDATE agents SET max_tasks = ?2, updated_at = ?3 WHERE id = ?1",
                                rusqlite::params![id, max_tasks, now],
                            )?;
                        }
                        if let Some(role) = &args.role {
                            tx.execute(
                                "UPDATE agents SET role = ?2, updated_at = ?3 WHERE id = ?1",
                                rusqlite::params![id, role, now],
                            )?;
                        }
                        if let Some(capabilities) = &args.capabilities {
                            let json = serde_json::to_string(capabilities)?;
                            tx.execute(
                                "UPDATE agents SET capabilities = ?2, updated_at = ?3 WHERE id = ?1",
                                rusqlite::params![id, json, now],
                            )?;
                        }
                        if let Some(identity) = &args.identity {
                            tx.execute(
                                "UPDATE agents SET persona = ?2, instructions = ?3, \
                                 context_notes = ?4, memory_summary = ?5, scratchpad = ?6, \
                                 updated_at = ?7 WHERE id = ?1",
                                rusqlite::params![
                                    id,
                                    identity.persona,
                                    identity.instructions,
                                    identity.context_notes,
                                    identity.memory_summary,
                                    identity.scratchpad,
                                    now
                                ],
                            )?;
                        }
                        tx.execute(
                            "UPDATE agents SET empty_poll_count = 0 WHERE id = ?1",
                            rusqlite::params![id],
                        )?;
                    }
                    None => {
                        let capabilities =
                            serde_json::to_string(&args.capabilities.clone().unwrap_or_default())?;
                        let identity = args.identity.clone().unwrap_or_default();
                        tx.execute(
                            "INSERT INTO agents (id, name, is_lead, status, role, capabilities, \
                             max_tasks, persona, instructions, context_notes, memory_summary, \
                             scratchpad, empty_poll_count, created_at, updated_at) \
                             VALUES (?1, ?2, ?3, 'idle', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)",
                            rusqlite::params![
                                id,
                                args.name,
                                args.is_lead,
                                args.role,
                                capabilities,
                                args.max_tasks.unwrap_or(1),
                                identity.persona,
                                identity.instructions,
                                identity.context_notes,
                                identity.memory_summary,
                                identity.scratchpad,
                                now
                            ],
                        )
                        .map_err(map_name_conflict)?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(agent_id = %stored_id, "agent registered");
        self.get_required(&stored_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Agent>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
                        rusqlite::params![id],
                        AgentRow::map,
                    )
                    .optional()?;
                row.map(|r| r.into_agent()).transpose()
            })
            .await
    }

    pub async fn get_required(&self, id: &str) -> Result<Agent> {
        self.get(id).await?.ok_or_else(|| SwarmError::NotFound {
            entity: "agent",
            id: id.to_string(),
        })
    }

    /// Case-insensitive lookup by display name.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Agent>> {
        let name = name.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {AGENT_COLUMNS} FROM agents WHERE name = ?1 COLLATE NOCASE"
                        ),
                        rusqlite::params![name],
                        AgentRow::map,
                    )
                    .optional()?;
                row.map(|r| r.into_agent()).transpose()
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<Agent>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at ASC"
                ))?;
                let rows = stmt
                    .query_map([], AgentRow::map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(|r| r.into_agent()).collect()
            })
            .await
    }

    /// Bump `updated_at` so the broker knows the runner is alive.
    pub async fn ping(&self, id: &str) -> Result<()> {
        self.touch(id, None).await
    }

    /// Mark the agent offline; called by the runner on graceful shutdown.
    pub async fn close(&self, id: &str) -> Result<()> {
        self.touch(id, Some(AgentStatus::Offline)).await
    }

    pub async fn set_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        self.touch(id, Some(status)).await
    }

    async fn touch(&self, id: &str, status: Option<AgentStatus>) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = match status {
                    Some(status) => conn.execute(
                        "UPDATE agents SET status = ?2, updated_at = ?3 WHERE id = ?1",
                        rusqlite::params![id, status.as_str(), now],
                    )?,
                    None => conn.execute(
                        "UPDATE agents SET updated_at = ?2 WHERE id = ?1",
                        rusqlite::params![id, now],
                    )?,
                };
                if updated == 0 {
                    return Err(SwarmError::NotFound {
                        entity: "agent",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// The lead agent, preferring one that is not offline.
    pub async fn find_lead(&self) -> Result<Option<Agent>> {
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {AGENT_COLUMNS} FROM agents WHERE is_lead = 1 \
                             ORDER BY (status != 'offline') DESC, created_at ASC LIMIT 1"
                        ),
                        [],
                        AgentRow::map,
                    )
                    .optional()?;
                row.map(|r| r.into_agent()).transpose()
            })
            .await
    }

    pub async fn any_online_worker(&self) -> Result<bool> {
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM agents WHERE is_lead = 0 AND status != 'offline'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    pub async fn increment_empty_poll(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE agents SET empty_poll_count = empty_poll_count + 1 WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn reset_empty_poll(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE agents SET empty_poll_count = 0 WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .await
    }
}

fn validate_identity(identity: &AgentIdentity) -> Result<()> {
    for (field, value) in [
        ("persona", &identity.persona),
        ("instructions", &identity.instructions),
        ("contextNotes", &identity.context_notes),
        ("memorySummary", &identity.memory_summary),
        ("scratchpad", &identity.scratchpad),
    ] {
        if let Some(text) = value {
            if text.len() > IDENTITY_BLOB_MAX_BYTES {
                return Err(SwarmError::Validation(format!(
                    "identity field '{field}' exceeds 64 KiB"
                )));
            }
        }
    }
    Ok(())
}

fn map_name_conflict(err: rusqlite::Error) -> SwarmError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SwarmError::Conflict("an agent with this name already exists".into())
        }
        _ => SwarmError::Sqlite(err),
    }
}
