//! Per-agent service registry, used for artifact and service discovery.
//!
//! Registration is best-effort from the caller's point of view: runners
//! fire-and-forget it and never fail a task because of it.

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::models::Service;
use crate::store::rows::{service_from_row, SERVICE_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

/// Arguments for [`ServiceStore::register`].
#[derive(Debug, Clone)]
pub struct RegisterService {
    pub agent_id: String,
    pub name: String,
    pub port: i64,
    pub script: Option<String>,
    pub health_path: Option<String>,
    pub url: Option<String>,
}

#[derive(Clone)]
pub struct ServiceStore {
    db: Database,
}

impl ServiceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert on `(agent_id, name)`.
    pub async fn register(&self, args: RegisterService) -> Result<Service> {
        if args.name.trim().is_empty() {
            return Err(SwarmError::Validation("service name is required".into()));
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let agent_id = args.agent_id.clone();
        let name = args.name.clone();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO services (id, agent_id, name, port, script, status, \
                     health_path, url, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6, ?7, ?8, ?8) \
                     ON CONFLICT(agent_id, name) DO UPDATE SET \
                     port = excluded.port, script = excluded.script, status = 'running', \
                     health_path = excluded.health_path, url = excluded.url, \
                     updated_at = excluded.updated_at",
                    rusqlite::params![
                        id,
                        args.agent_id,
                        args.name,
                        args.port,
                        args.script,
                        args.health_path,
                        args.url,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        let (agent, svc) = (agent_id, name);
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {SERVICE_COLUMNS} FROM services \
                             WHERE agent_id = ?1 AND name = ?2"
                        ),
                        rusqlite::params![agent, svc],
                        service_from_row,
                    )
                    .optional()?;
                row.ok_or(SwarmError::NotFound {
                    entity: "service",
                    id: svc,
                })
            })
            .await
    }

    pub async fn list(&self, agent_id: Option<String>) -> Result<Vec<Service>> {
        self.db
            .execute(move |conn| {
                let rows = match &agent_id {
                    Some(agent_id) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {SERVICE_COLUMNS} FROM services \
                             WHERE agent_id = ?1 ORDER BY name ASC"
                        ))?;
                        let rows = stmt
                            .query_map(rusqlite::params![agent_id], service_from_row)?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {SERVICE_COLUMNS} FROM services ORDER BY agent_id, name ASC"
                        ))?;
                        let rows = stmt
                            .query_map([], service_from_row)?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::agents::RegisterAgent;
    use crate::store::{test_db, AgentStore};

    #[tokio::test]
    async fn register_is_an_upsert() {
        let db = test_db().await;
        let agent = AgentStore::new(db.clone())
            .register(RegisterAgent {
                name: "w1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let store = ServiceStore::new(db);

        let first = store
            .register(RegisterService {
                agent_id: agent.id.clone(),
                name: "preview".into(),
                port: 4000,
                script: None,
                health_path: Some("/healthz".into()),
                url: None,
            })
            .await
            .unwrap();
        assert_eq!(first.port, 4000);

        let second = store
            .register(RegisterService {
                agent_id: agent.id.clone(),
                name: "preview".into(),
                port: 4001,
                script: None,
                health_path: Some("/healthz".into()),
                url: None,
            })
            .await
            .unwrap();
        assert_eq!(second.port, 4001);

        assert_eq!(store.list(Some(agent.id)).await.unwrap().len(), 1);
    }
}
