//! Internal chat channels and messages.
//!
//! Mentions are routed through the trigger resolver: a poll that finds
//! unread mentions claims the channels by stamping a short-lived
//! processing hold, so other pollers skip them until the hold expires.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction};
use uuid::Uuid;

use crate::constants::CHANNEL_HOLD_SECS;
use crate::models::{Channel, ChannelMessage};
use crate::store::rows::{channel_from_row, ChannelMessageRow, CHANNEL_COLUMNS, CHANNEL_MESSAGE_COLUMNS};
use crate::store::Database;
use crate::{Result, SwarmError};

#[derive(Clone)]
pub struct ChannelStore {
    db: Database,
}

impl ChannelStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str, is_dm: bool) -> Result<Channel> {
        if name.trim().is_empty() {
            return Err(SwarmError::Validation("channel name is required".into()));
        }
        let id = Uuid::new_v4().to_string();
        let name = name.to_string();
        let now = Utc::now().timestamp();
        let stored_id = id.clone();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO channels (id, name, is_dm, created_at) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, name, is_dm, now],
                )
                .map_err(|err| match &err {
                    rusqlite::Error::SqliteFailure(e, _)
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        SwarmError::Conflict("a channel with this name already exists".into())
                    }
                    _ => SwarmError::Sqlite(err),
                })?;
                Ok(())
            })
            .await?;

        self.get_required(&stored_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Channel>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                        rusqlite::params![id],
                        channel_from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
    }

    pub async fn get_required(&self, id: &str) -> Result<Channel> {
        self.get(id).await?.ok_or_else(|| SwarmError::NotFound {
            entity: "channel",
            id: id.to_string(),
        })
    }

    pub async fn list(&self) -> Result<Vec<Channel>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY created_at ASC"
                ))?;
                let rows = stmt
                    .query_map([], channel_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Post a message. `author_agent_id` is `None` for a human author.
    pub async fn post_message(
        &self,
        channel_id: &str,
        author_agent_id: Option<String>,
        content: &str,
        reply_to_id: Option<i64>,
        mentions: Vec<String>,
    ) -> Result<ChannelMessage> {
        if content.trim().is_empty() {
            return Err(SwarmError::Validation("message content is required".into()));
        }
        let channel_id = channel_id.to_string();
        let content = content.to_string();
        let now = Utc::now().timestamp();

        let message_id = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM channels WHERE id = ?1",
                        rusqlite::params![channel_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(SwarmError::NotFound {
                        entity: "channel",
                        id: channel_id,
                    });
                }

                tx.execute(
                    "INSERT INTO channel_messages (channel_id, author_agent_id, content, \
                     reply_to_id, mentions, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        channel_id,
                        author_agent_id,
                        content,
                        reply_to_id,
                        serde_json::to_string(&mentions)?,
                        now
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(id)
            })
            .await?;

        self.get_message(message_id).await
    }

    async fn get_message(&self, id: i64) -> Result<ChannelMessage> {
        self.db
            .execute(move |conn| {
                let row = conn.query_row(
                    &format!("SELECT {CHANNEL_MESSAGE_COLUMNS} FROM channel_messages WHERE id = ?1"),
                    rusqlite::params![id],
                    ChannelMessageRow::map,
                )?;
                row.into_message()
            })
            .await
    }

    /// Messages in a channel, oldest first. When `reader` is set, the
    /// agent's read cursor advances to the newest returned message.
    pub async fn messages(
        &self,
        channel_id: &str,
        reader: Option<String>,
        limit: i64,
    ) -> Result<Vec<ChannelMessage>> {
        let channel_id = channel_id.to_string();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let messages = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {CHANNEL_MESSAGE_COLUMNS} \
                         FROM (SELECT * FROM channel_messages WHERE channel_id = ?1 \
                               ORDER BY created_at DESC, id DESC LIMIT ?2) \
                         ORDER BY created_at ASC, id ASC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![channel_id, limit], ChannelMessageRow::map)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows.into_iter()
                        .map(|r| r.into_message())
                        .collect::<Result<Vec<_>>>()?
                };

                if let (Some(reader), Some(last)) = (&reader, messages.last()) {
                    tx.execute(
                        "INSERT INTO channel_reads (channel_id, agent_id, last_read_message_id) \
                         VALUES (?1, ?2, ?3) \
                         ON CONFLICT(channel_id, agent_id) \
                         DO UPDATE SET last_read_message_id = MAX(last_read_message_id, ?3)",
                        rusqlite::params![channel_id, reader, last.id],
                    )?;
                }

                tx.commit()?;
                Ok(messages)
            })
            .await
    }
}

/// Channels with unread mentions of `agent_id` that are not currently
/// held, claimed with a processing hold. Returns the total unread mention
/// count and the claimed channel ids. Runs inside the resolver's
/// transaction.
pub(crate) fn claim_mention_channels(
    tx: &Transaction<'_>,
    agent_id: &str,
    now: i64,
) -> Result<(i64, Vec<String>)> {
    let candidates: Vec<(String, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT c.id, COUNT(m.id) FROM channels c \
             JOIN channel_messages m ON m.channel_id = c.id \
             WHERE m.id > COALESCE((SELECT last_read_message_id FROM channel_reads \
                                    WHERE channel_id = c.id AND agent_id = ?1), 0) \
             AND EXISTS (SELECT 1 FROM json_each(m.mentions) WHERE value = ?1) \
             AND (c.processing_until IS NULL OR c.processing_until < ?2) \
             GROUP BY c.id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![agent_id, now], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut claimed = Vec::new();
    let mut mentions_count = 0;
    for (channel_id, count) in candidates {
        let updated = tx.execute(
            "UPDATE channels SET processing_by = ?2, processing_until = ?3 \
             WHERE id = ?1 AND (processing_until IS NULL OR processing_until < ?4)",
            rusqlite::params![channel_id, agent_id, now + CHANNEL_HOLD_SECS, now],
        )?;
        if updated == 1 {
            mentions_count += count;
            claimed.push(channel_id);
        }
    }
    Ok((mentions_count, claimed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::agents::RegisterAgent;
    use crate::store::{test_db, AgentStore};

    async fn setup() -> (Database, ChannelStore, String, String) {
        let db = test_db().await;
        let agents = AgentStore::new(db.clone());
        let a = agents
            .register(RegisterAgent {
                name: "alpha".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let b = agents
            .register(RegisterAgent {
                name: "beta".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (db.clone(), ChannelStore::new(db), a.id, b.id)
    }

    #[tokio::test]
    async fn post_and_read_messages() {
        let (_db, store, alpha, _beta) = setup().await;
        let channel = store.create("general", false).await.unwrap();

        store
            .post_message(&channel.id, Some(alpha.clone()), "hello", None, vec![])
            .await
            .unwrap();
        store
            .post_message(&channel.id, None, "hi from a human", None, vec![])
            .await
            .unwrap();

        let messages = store.messages(&channel.id, None, 50).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert!(messages[1].author_agent_id.is_none());
    }

    #[tokio::test]
    async fn duplicate_channel_name_is_conflict() {
        let (_db, store, _a, _b) = setup().await;
        store.create("general", false).await.unwrap();
        let err = store.create("general", false).await.unwrap_err();
        assert!(matches!(err, SwarmError::Conflict(_)));
    }

    #[tokio::test]
    async fn mention_claim_holds_channel() {
        let (db, store, alpha, beta) = setup().await;
        let channel = store.create("general", false).await.unwrap();
        store
            .post_message(
                &channel.id,
                Some(alpha.clone()),
                "@beta take a look",
                None,
                vec![beta.clone()],
            )
            .await
            .unwrap();

        let now = Utc::now().timestamp();

        // Beta's poll claims the channel.
        let beta_id = beta.clone();
        let (count, channels) = db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let claimed = claim_mention_channels(&tx, &beta_id, now)?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(channels, vec![channel.id.clone()]);

        // Alpha was not mentioned: nothing to claim.
        let alpha_id = alpha.clone();
        let (count, channels) = db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let claimed = claim_mention_channels(&tx, &alpha_id, now)?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn reading_clears_the_mention() {
        let (db, store, alpha, beta) = setup().await;
        let channel = store.create("general", false).await.unwrap();
        store
            .post_message(
                &channel.id,
                Some(alpha),
                "@beta ping",
                None,
                vec![beta.clone()],
            )
            .await
            .unwrap();

        // Reading with a cursor consumes the mention.
        store
            .messages(&channel.id, Some(beta.clone()), 50)
            .await
            .unwrap();

        let now = Utc::now().timestamp() + CHANNEL_HOLD_SECS + 1;
        let beta_id = beta.clone();
        let (count, channels) = db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let claimed = claim_mention_channels(&tx, &beta_id, now)?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(channels.is_empty());
    }
}
