//! Stored `(scope, key, value)` configuration entries.
//!
//! Entries in the `env` scope are imported into the broker's process
//! environment at startup, as a one-shot initialization with an explicit
//! reload endpoint rather than a read-through view.

use chrono::Utc;
use tracing::info;

use crate::models::GlobalConfig;
use crate::store::Database;
use crate::Result;

#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let scope = scope.to_string();
        let key = key.to_string();
        let value = value.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO global_configs (scope, key, value, updated_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(scope, key) DO UPDATE SET \
                     value = excluded.value, updated_at = excluded.updated_at",
                    rusqlite::params![scope, key, value, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn list(&self, scope: Option<String>) -> Result<Vec<GlobalConfig>> {
        self.db
            .execute(move |conn| {
                let rows = match &scope {
                    Some(scope) => {
                        let mut stmt = conn.prepare(
                            "SELECT scope, key, value, updated_at FROM global_configs \
                             WHERE scope = ?1 ORDER BY key ASC",
                        )?;
                        let rows = stmt
                            .query_map(rusqlite::params![scope], map_config)?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT scope, key, value, updated_at FROM global_configs \
                             ORDER BY scope, key ASC",
                        )?;
                        let rows = stmt
                            .query_map([], map_config)?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await
    }

    /// Import every `env`-scoped entry into the process environment.
    /// Returns how many variables were set.
    pub async fn import_env(&self) -> Result<usize> {
        let entries = self.list(Some("env".to_string())).await?;
        let count = entries.len();
        for entry in entries {
            std::env::set_var(&entry.key, &entry.value);
        }
        if count > 0 {
            info!(count, "imported stored config entries into environment");
        }
        Ok(count)
    }
}

fn map_config(row: &rusqlite::Row) -> rusqlite::Result<GlobalConfig> {
    Ok(GlobalConfig {
        scope: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_db;

    #[tokio::test]
    async fn set_is_an_upsert() {
        let store = ConfigStore::new(test_db().await);
        store.set("env", "FEATURE_FLAG", "on").await.unwrap();
        store.set("env", "FEATURE_FLAG", "off").await.unwrap();

        let entries = store.list(Some("env".into())).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "off");
    }

    #[tokio::test]
    async fn import_env_sets_variables() {
        let store = ConfigStore::new(test_db().await);
        store
            .set("env", "SWARM_TEST_IMPORTED_VAR", "42")
            .await
            .unwrap();
        store.set("other", "IGNORED", "1").await.unwrap();

        let count = store.import_env().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(std::env::var("SWARM_TEST_IMPORTED_VAR").unwrap(), "42");
        std::env::remove_var("SWARM_TEST_IMPORTED_VAR");
    }
}
