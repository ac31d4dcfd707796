//! Epics: named containers of tasks with computed progress.
//!
//! Progress is derived (completed ÷ total) at query time. The engine
//! stamps `stats_changed_at` whenever a member task changes status; the
//! trigger resolver compares it to `notified_at` and stamps the latter
//! when delivering an `epic_progress_changed` trigger, so an epic fires
//! once per change window.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, Transaction};
use uuid::Uuid;

use crate::models::{Epic, EpicStatus};
use crate::store::Database;
use crate::{Result, SwarmError};

/// Epic columns plus derived task stats.
const EPIC_SELECT: &str = "SELECT e.id, e.name, e.goal, e.status, e.stats_changed_at, \
     e.notified_at, e.created_at, e.updated_at, \
     (SELECT COUNT(*) FROM tasks t WHERE t.epic_id = e.id) AS total_tasks, \
     (SELECT COUNT(*) FROM tasks t WHERE t.epic_id = e.id AND t.status = 'completed') \
         AS completed_tasks \
     FROM epics e";

fn epic_from_row(row: &Row) -> rusqlite::Result<(Epic, String)> {
    let status: String = row.get(3)?;
    let total: i64 = row.get(8)?;
    let completed: i64 = row.get(9)?;
    let progress = if total > 0 {
        completed as f64 / total as f64
    } else {
        0.0
    };
    Ok((
        Epic {
            id: row.get(0)?,
            name: row.get(1)?,
            goal: row.get(2)?,
            // Placeholder; parsed from the returned string in a second step.
            status: EpicStatus::Active,
            total_tasks: total,
            completed_tasks: completed,
            progress,
            stats_changed_at: row.get(4)?,
            notified_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        status,
    ))
}

fn finish_epic((mut epic, status): (Epic, String)) -> Result<Epic> {
    epic.status = status
        .parse::<EpicStatus>()
        .map_err(|e| SwarmError::Internal(anyhow::anyhow!("corrupt epic status: {e}")))?;
    Ok(epic)
}

/// Fields accepted by [`EpicStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateEpic {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub status: Option<EpicStatus>,
}

#[derive(Clone)]
pub struct EpicStore {
    db: Database,
}

impl EpicStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str, goal: Option<String>) -> Result<Epic> {
        if name.trim().is_empty() {
            return Err(SwarmError::Validation("epic name is required".into()));
        }
        let id = Uuid::new_v4().to_string();
        let name = name.to_string();
        let now = Utc::now().timestamp();
        let stored_id = id.clone();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO epics (id, name, goal, status, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
                    rusqlite::params![id, name, goal, now],
                )?;
                Ok(())
            })
            .await?;

        self.get_required(&stored_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Epic>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("{EPIC_SELECT} WHERE e.id = ?1"),
                        rusqlite::params![id],
                        epic_from_row,
                    )
                    .optional()?;
                row.map(finish_epic).transpose()
            })
            .await
    }

    pub async fn get_required(&self, id: &str) -> Result<Epic> {
        self.get(id).await?.ok_or_else(|| SwarmError::NotFound {
            entity: "epic",
            id: id.to_string(),
        })
    }

    pub async fn list(&self) -> Result<Vec<Epic>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!("{EPIC_SELECT} ORDER BY e.created_at ASC"))?;
                let rows = stmt
                    .query_map([], epic_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(finish_epic).collect()
            })
            .await
    }

    pub async fn update(&self, id: &str, args: UpdateEpic) -> Result<Epic> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        let stored_id = id.clone();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE epics SET name = COALESCE(?2, name), goal = COALESCE(?3, goal), \
                     status = COALESCE(?4, status), updated_at = ?5 WHERE id = ?1",
                    rusqlite::params![
                        id,
                        args.name,
                        args.goal,
                        args.status.map(|s| s.as_str()),
                        now
                    ],
                )?;
                if updated == 0 {
                    return Err(SwarmError::NotFound {
                        entity: "epic",
                        id,
                    });
                }
                Ok(())
            })
            .await?;

        self.get_required(&stored_id).await
    }
}

/// Active epics whose task stats changed since they were last notified,
/// claimed by stamping `notified_at = now`. Runs inside the resolver's
/// transaction.
pub(crate) fn claim_changed_epics(tx: &Transaction<'_>, now: i64) -> Result<Vec<Epic>> {
    let changed: Vec<(Epic, String)> = {
        let mut stmt = tx.prepare(&format!(
            "{EPIC_SELECT} WHERE e.status = 'active' AND e.stats_changed_at IS NOT NULL \
             AND (e.notified_at IS NULL OR e.stats_changed_at > e.notified_at)"
        ))?;
        let rows = stmt
            .query_map([], epic_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut epics = Vec::with_capacity(changed.len());
    for pair in changed {
        tx.execute(
            "UPDATE epics SET notified_at = ?2 WHERE id = ?1",
            rusqlite::params![pair.0.id, now],
        )?;
        epics.push(finish_epic(pair)?);
    }
    Ok(epics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CreateTask, FinishStatus, TaskEngine};
    use crate::models::TaskSource;
    use crate::store::agents::RegisterAgent;
    use crate::store::{test_db, AgentStore};

    #[tokio::test]
    async fn progress_is_computed_from_member_tasks() {
        let db = test_db().await;
        let epics = EpicStore::new(db.clone());
        let engine = TaskEngine::new(db.clone());
        let agents = AgentStore::new(db.clone());

        let worker = agents
            .register(RegisterAgent {
                name: "w1".into(),
                max_tasks: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        let epic = epics.create("ship v1", Some("launch".into())).await.unwrap();
        assert_eq!(epic.progress, 0.0);
        assert_eq!(epic.total_tasks, 0);

        let mut first = CreateTask::new("a", TaskSource::Api);
        first.epic_id = Some(epic.id.clone());
        first.agent_id = Some(worker.id.clone());
        let first = engine.create(first).await.unwrap();

        let mut second = CreateTask::new("b", TaskSource::Api);
        second.epic_id = Some(epic.id.clone());
        engine.create(second).await.unwrap();

        // Finish one of two: progress 0.5.
        db.execute_mut({
            let agent = worker.id.clone();
            move |conn| {
                let tx = conn.transaction()?;
                crate::engine::claim_assigned(&tx, &agent, 100)?;
                tx.commit()?;
                Ok(())
            }
        })
        .await
        .unwrap();
        engine
            .finish(&first.id, &worker.id, FinishStatus::Completed, None, None)
            .await
            .unwrap();

        let epic = epics.get_required(&epic.id).await.unwrap();
        assert_eq!(epic.total_tasks, 2);
        assert_eq!(epic.completed_tasks, 1);
        assert!((epic.progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn changed_epics_fire_once_per_change_window() {
        let db = test_db().await;
        let epics = EpicStore::new(db.clone());
        let engine = TaskEngine::new(db.clone());

        let epic = epics.create("quiet epic", None).await.unwrap();

        async fn claim_now(db: &Database) -> Vec<Epic> {
            db.execute_mut(|conn| {
                let tx = conn.transaction()?;
                let claimed = claim_changed_epics(&tx, Utc::now().timestamp())?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .unwrap()
        }

        // No stats change yet: nothing to claim.
        assert!(claim_now(&db).await.is_empty());

        // Creating a member task bumps the stats.
        let mut args = CreateTask::new("member", TaskSource::Api);
        args.epic_id = Some(epic.id.clone());
        engine.create(args).await.unwrap();

        assert_eq!(claim_now(&db).await.len(), 1);

        // Claimed: the same change does not fire again.
        assert!(claim_now(&db).await.is_empty());
    }
}
