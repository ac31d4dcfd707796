//! Source repositories known to the broker.

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::models::Repo;
use crate::store::rows::{repo_from_row, REPO_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

#[derive(Clone)]
pub struct RepoStore {
    db: Database,
}

impl RepoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        name: &str,
        url: &str,
        default_branch: Option<String>,
        agent_id: Option<String>,
    ) -> Result<Repo> {
        if name.trim().is_empty() || url.trim().is_empty() {
            return Err(SwarmError::Validation("repo name and url are required".into()));
        }
        let id = Uuid::new_v4().to_string();
        let name = name.to_string();
        let url = url.to_string();
        let now = Utc::now().timestamp();
        let stored = name.clone();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO repos (id, name, url, default_branch, agent_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        id,
                        name,
                        url,
                        default_branch.unwrap_or_else(|| "main".to_string()),
                        agent_id,
                        now
                    ],
                )
                .map_err(|err| match &err {
                    rusqlite::Error::SqliteFailure(e, _)
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        SwarmError::Conflict("a repo with this name already exists".into())
                    }
                    _ => SwarmError::Sqlite(err),
                })?;
                Ok(())
            })
            .await?;

        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {REPO_COLUMNS} FROM repos WHERE name = ?1"),
                        rusqlite::params![stored],
                        repo_from_row,
                    )
                    .optional()?;
                row.ok_or(SwarmError::NotFound {
                    entity: "repo",
                    id: "just created".into(),
                })
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<Repo>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {REPO_COLUMNS} FROM repos ORDER BY name ASC"))?;
                let rows = stmt
                    .query_map([], repo_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}
