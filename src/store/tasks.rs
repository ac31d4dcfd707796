//! Read-side task queries.
//!
//! All task mutations go through the engine so every transition runs its
//! guards inside one transaction; this store only reads.

use rusqlite::OptionalExtension;

use crate::models::Task;
use crate::store::rows::{TaskRow, TASK_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

/// Filters for [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub agent_id: Option<String>,
    /// Substring match on the description.
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                        rusqlite::params![id],
                        TaskRow::map,
                    )
                    .optional()?;
                row.map(|r| r.into_task()).transpose()
            })
            .await
    }

    pub async fn get_required(&self, id: &str) -> Result<Task> {
        self.get(id).await?.ok_or_else(|| SwarmError::NotFound {
            entity: "task",
            id: id.to_string(),
        })
    }

    pub async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.db
            .execute(move |conn| {
                let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
                let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

                if let Some(status) = &filter.status {
                    sql.push_str(&format!(" AND status = ?{}", params.len() + 1));
                    params.push(Box::new(status.clone()));
                }
                if let Some(agent_id) = &filter.agent_id {
                    sql.push_str(&format!(" AND agent_id = ?{}", params.len() + 1));
                    params.push(Box::new(agent_id.clone()));
                }
                if let Some(search) = &filter.search {
                    sql.push_str(&format!(" AND description LIKE ?{}", params.len() + 1));
                    params.push(Box::new(format!("%{search}%")));
                }

                sql.push_str(&format!(
                    " ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
                    params.len() + 1,
                    params.len() + 2
                ));
                params.push(Box::new(filter.limit));
                params.push(Box::new(filter.offset));

                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(param_refs), TaskRow::map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(|r| r.into_task()).collect()
            })
            .await
    }

    /// Paused tasks owned by `agent_id`, oldest first — the resume sweep.
    pub async fn paused_for_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        let agent_id = agent_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE agent_id = ?1 AND status = 'paused' ORDER BY updated_at ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![agent_id], TaskRow::map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(|r| r.into_task()).collect()
            })
            .await
    }

    /// Cancelled tasks among `task_ids` — the in-child hook's poll.
    pub async fn cancelled_among(&self, task_ids: Vec<String>) -> Result<Vec<Task>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db
            .execute(move |conn| {
                let placeholders = (1..=task_ids.len())
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status = 'cancelled' AND id IN ({placeholders})"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(task_ids.iter()), TaskRow::map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(|r| r.into_task()).collect()
            })
            .await
    }

    /// Recent tasks created by `creator` within the dedup window.
    pub async fn recent_by_creator(&self, creator: &str, since: i64) -> Result<Vec<Task>> {
        let creator = creator.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE created_by = ?1 AND created_at >= ?2 ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![creator, since], TaskRow::map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(|r| r.into_task()).collect()
            })
            .await
    }

    /// Count of tasks actually executing for `agent_id`.
    pub async fn count_in_progress(&self, agent_id: &str) -> Result<i64> {
        let agent_id = agent_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE agent_id = ?1 AND status = 'in_progress'",
                    rusqlite::params![agent_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    /// Count of tasks holding a capacity slot for `agent_id`: everything
    /// non-terminal, non-paused, non-unassigned.
    pub async fn count_active(&self, agent_id: &str) -> Result<i64> {
        let agent_id = agent_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE agent_id = ?1 \
                     AND status IN ('offered','reviewing','pending','in_progress')",
                    rusqlite::params![agent_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    /// Count of unassigned pool tasks whose dependencies are all completed.
    pub async fn pool_count(&self) -> Result<i64> {
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM tasks t WHERE t.status = 'unassigned' \
                     AND NOT EXISTS (\
                        SELECT 1 FROM json_each(t.depends_on) dep \
                        JOIN tasks d ON d.id = dep.value \
                        WHERE d.status != 'completed')",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}
