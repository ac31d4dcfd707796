//! Lead-facing inbox messages.
//!
//! Rows are created by the inbox router and claimed atomically by the
//! trigger resolver (`unread → processing` with a holding timestamp)
//! inside the resolver's own transaction.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction};
use uuid::Uuid;

use crate::models::{InboxMessage, InboxStatus, TaskSource};
use crate::store::rows::{InboxRow, INBOX_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

/// Arguments for [`InboxStore::create`].
#[derive(Debug, Clone)]
pub struct CreateInboxMessage {
    pub agent_id: String,
    pub content: String,
    pub source: TaskSource,
    pub slack_channel_id: Option<String>,
    pub slack_thread_ts: Option<String>,
    pub slack_user_id: Option<String>,
    pub matched_text: Option<String>,
}

#[derive(Clone)]
pub struct InboxStore {
    db: Database,
}

impl InboxStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, args: CreateInboxMessage) -> Result<InboxMessage> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let stored_id = id.clone();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO inbox_messages (id, agent_id, content, source, status, \
                     slack_channel_id, slack_thread_ts, slack_user_id, matched_text, \
                     created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 'unread', ?5, ?6, ?7, ?8, ?9, ?9)",
                    rusqlite::params![
                        id,
                        args.agent_id,
                        args.content,
                        args.source.as_str(),
                        args.slack_channel_id,
                        args.slack_thread_ts,
                        args.slack_user_id,
                        args.matched_text,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        self.get_required(&stored_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<InboxMessage>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {INBOX_COLUMNS} FROM inbox_messages WHERE id = ?1"),
                        rusqlite::params![id],
                        InboxRow::map,
                    )
                    .optional()?;
                row.map(|r| r.into_message()).transpose()
            })
            .await
    }

    pub async fn get_required(&self, id: &str) -> Result<InboxMessage> {
        self.get(id).await?.ok_or_else(|| SwarmError::NotFound {
            entity: "inbox message",
            id: id.to_string(),
        })
    }

    pub async fn list_for_agent(&self, agent_id: &str, limit: i64) -> Result<Vec<InboxMessage>> {
        let agent_id = agent_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {INBOX_COLUMNS} FROM inbox_messages \
                     WHERE agent_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![agent_id, limit], InboxRow::map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter().map(|r| r.into_message()).collect()
            })
            .await
    }

    pub async fn count_unread(&self, agent_id: &str) -> Result<i64> {
        let agent_id = agent_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM inbox_messages WHERE agent_id = ?1 AND status = 'unread'",
                    rusqlite::params![agent_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    /// Move a message to a new status; records the response text or the
    /// delegated task id when the status calls for one.
    pub async fn set_status(
        &self,
        id: &str,
        status: InboxStatus,
        response_text: Option<String>,
        delegated_to_task_id: Option<String>,
    ) -> Result<InboxMessage> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        let stored_id = id.clone();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE inbox_messages SET status = ?2, \
                     response_text = COALESCE(?3, response_text), \
                     delegated_to_task_id = COALESCE(?4, delegated_to_task_id), \
                     updated_at = ?5 WHERE id = ?1",
                    rusqlite::params![id, status.as_str(), response_text, delegated_to_task_id, now],
                )?;
                if updated == 0 {
                    return Err(SwarmError::NotFound {
                        entity: "inbox message",
                        id,
                    });
                }
                Ok(())
            })
            .await?;

        self.get_required(&stored_id).await
    }
}

/// Claim up to `limit` unread messages for `agent_id`: `unread →
/// processing` with the holding timestamp. Runs inside the resolver's
/// transaction so concurrent pollers cannot both receive a message.
pub(crate) fn claim_unread(
    tx: &Transaction<'_>,
    agent_id: &str,
    limit: i64,
    now: i64,
) -> Result<Vec<InboxMessage>> {
    let ids: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM inbox_messages WHERE agent_id = ?1 AND status = 'unread' \
             ORDER BY created_at ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![agent_id, limit], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        rows
    };

    let mut claimed = Vec::with_capacity(ids.len());
    for id in ids {
        let updated = tx.execute(
            "UPDATE inbox_messages SET status = 'processing', processing_at = ?2, \
             updated_at = ?2 WHERE id = ?1 AND status = 'unread'",
            rusqlite::params![id, now],
        )?;
        if updated != 1 {
            continue;
        }
        let row = tx.query_row(
            &format!("SELECT {INBOX_COLUMNS} FROM inbox_messages WHERE id = ?1"),
            rusqlite::params![id],
            InboxRow::map,
        )?;
        claimed.push(row.into_message()?);
    }
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::agents::RegisterAgent;
    use crate::store::{test_db, AgentStore};

    async fn setup() -> (Database, InboxStore, String) {
        let db = test_db().await;
        let lead = AgentStore::new(db.clone())
            .register(RegisterAgent {
                name: "lead".into(),
                is_lead: true,
                ..Default::default()
            })
            .await
            .unwrap();
        (db.clone(), InboxStore::new(db), lead.id)
    }

    fn message(agent_id: &str, content: &str) -> CreateInboxMessage {
        CreateInboxMessage {
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            source: TaskSource::Slack,
            slack_channel_id: Some("C1".into()),
            slack_thread_ts: Some("1.2".into()),
            slack_user_id: Some("U1".into()),
            matched_text: None,
        }
    }

    #[tokio::test]
    async fn create_starts_unread() {
        let (_db, store, lead) = setup().await;
        let msg = store.create(message(&lead, "hello")).await.unwrap();
        assert_eq!(msg.status, InboxStatus::Unread);
        assert_eq!(store.count_unread(&lead).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claim_unread_is_exclusive() {
        let (db, store, lead) = setup().await;
        for i in 0..7 {
            store.create(message(&lead, &format!("m{i}"))).await.unwrap();
        }

        let lead_id = lead.clone();
        let claimed = db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let claimed = claim_unread(&tx, &lead_id, 5, 100)?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .unwrap();
        assert_eq!(claimed.len(), 5);
        assert!(claimed.iter().all(|m| m.status == InboxStatus::Processing));
        assert!(claimed.iter().all(|m| m.processing_at == Some(100)));

        // Only the two remaining unread messages can be claimed again.
        let lead_id = lead.clone();
        let second = db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let claimed = claim_unread(&tx, &lead_id, 5, 101)?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn delegate_records_task_id() {
        let (_db, store, lead) = setup().await;
        let msg = store.create(message(&lead, "do a thing")).await.unwrap();

        let updated = store
            .set_status(&msg.id, InboxStatus::Delegated, None, Some("task-9".into()))
            .await
            .unwrap();
        assert_eq!(updated.status, InboxStatus::Delegated);
        assert_eq!(updated.delegated_to_task_id.as_deref(), Some("task-9"));
    }
}
