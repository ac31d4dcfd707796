//! Append-only session observability: child stdout batches and costs.

use chrono::Utc;

use crate::models::{SessionCost, SessionLog};
use crate::store::Database;
use crate::Result;

/// One `POST /api/session-logs` body.
#[derive(Debug, Clone)]
pub struct AppendLogs {
    pub session_id: String,
    pub iteration: i64,
    pub task_id: Option<String>,
    pub cli: String,
    pub lines: Vec<String>,
}

/// One `POST /api/session-costs` body.
#[derive(Debug, Clone)]
pub struct AppendCost {
    pub session_id: String,
    pub iteration: i64,
    pub task_id: Option<String>,
    pub cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: Option<i64>,
    pub cache_creation_tokens: Option<i64>,
    pub model: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn append_logs(&self, args: AppendLogs) -> Result<i64> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO session_logs (session_id, iteration, task_id, cli, lines, \
                     created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        args.session_id,
                        args.iteration,
                        args.task_id,
                        args.cli,
                        serde_json::to_string(&args.lines)?,
                        now
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn append_cost(&self, args: AppendCost) -> Result<i64> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO session_costs (session_id, iteration, task_id, cost_usd, \
                     input_tokens, output_tokens, cache_read_tokens, cache_creation_tokens, \
                     model, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        args.session_id,
                        args.iteration,
                        args.task_id,
                        args.cost_usd,
                        args.input_tokens,
                        args.output_tokens,
                        args.cache_read_tokens,
                        args.cache_creation_tokens,
                        args.model,
                        now
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn logs_for_session(&self, session_id: &str) -> Result<Vec<SessionLog>> {
        let session_id = session_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, iteration, task_id, cli, lines, created_at \
                     FROM session_logs WHERE session_id = ?1 ORDER BY iteration ASC, id ASC",
                )?;
                let raw = stmt
                    .query_map(rusqlite::params![session_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                raw.into_iter()
                    .map(|(id, session_id, iteration, task_id, cli, lines, created_at)| {
                        Ok(SessionLog {
                            id,
                            session_id,
                            iteration,
                            task_id,
                            cli,
                            lines: serde_json::from_str(&lines)?,
                            created_at,
                        })
                    })
                    .collect()
            })
            .await
    }

    pub async fn costs_for_session(&self, session_id: &str) -> Result<Vec<SessionCost>> {
        let session_id = session_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, iteration, task_id, cost_usd, input_tokens, \
                     output_tokens, cache_read_tokens, cache_creation_tokens, model, created_at \
                     FROM session_costs WHERE session_id = ?1 ORDER BY iteration ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id], |row| {
                        Ok(SessionCost {
                            id: row.get(0)?,
                            session_id: row.get(1)?,
                            iteration: row.get(2)?,
                            task_id: row.get(3)?,
                            cost_usd: row.get(4)?,
                            input_tokens: row.get(5)?,
                            output_tokens: row.get(6)?,
                            cache_read_tokens: row.get(7)?,
                            cache_creation_tokens: row.get(8)?,
                            model: row.get(9)?,
                            created_at: row.get(10)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_db;

    #[tokio::test]
    async fn logs_round_trip() {
        let store = SessionStore::new(test_db().await);
        store
            .append_logs(AppendLogs {
                session_id: "s1".into(),
                iteration: 1,
                task_id: Some("t1".into()),
                cli: "claude".into(),
                lines: vec!["{\"type\":\"message\"}".into(), "{\"type\":\"result\"}".into()],
            })
            .await
            .unwrap();

        let logs = store.logs_for_session("s1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].lines.len(), 2);
        assert_eq!(logs[0].task_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn costs_round_trip() {
        let store = SessionStore::new(test_db().await);
        store
            .append_cost(AppendCost {
                session_id: "s1".into(),
                iteration: 2,
                task_id: None,
                cost_usd: 0.42,
                input_tokens: 1000,
                output_tokens: 250,
                cache_read_tokens: Some(800),
                cache_creation_tokens: None,
                model: Some("claude-sonnet".into()),
            })
            .await
            .unwrap();

        let costs = store.costs_for_session("s1").await.unwrap();
        assert_eq!(costs.len(), 1);
        assert!((costs[0].cost_usd - 0.42).abs() < f64::EPSILON);
        assert_eq!(costs[0].iteration, 2);
    }
}
