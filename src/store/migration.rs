//! Schema migrations.
//!
//! Versioned static SQL tracked in a `_migrations` table, so running the
//! set is idempotent. Add new migrations to the end of the array.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::{Result, SwarmError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "core schema — agents, tasks, inbox, channels, epics, services, sessions",
        sql: r#"
            CREATE TABLE agents (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                is_lead          INTEGER NOT NULL DEFAULT 0,
                status           TEXT NOT NULL DEFAULT 'idle' CHECK(status IN ('idle','busy','offline')),
                role             TEXT,
                capabilities     TEXT NOT NULL DEFAULT '[]',
                max_tasks        INTEGER NOT NULL DEFAULT 1,
                persona          TEXT,
                instructions     TEXT,
                context_notes    TEXT,
                memory_summary   TEXT,
                scratchpad       TEXT,
                empty_poll_count INTEGER NOT NULL DEFAULT 0,
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX idx_agents_name ON agents(name COLLATE NOCASE);

            CREATE TABLE tasks (
                id                    TEXT PRIMARY KEY,
                agent_id              TEXT REFERENCES agents(id),
                created_by            TEXT,
                description           TEXT NOT NULL,
                status                TEXT NOT NULL CHECK(status IN
                    ('backlog','unassigned','offered','reviewing','pending',
                     'in_progress','paused','completed','failed','cancelled')),
                source                TEXT NOT NULL DEFAULT 'api',
                task_type             TEXT,
                tags                  TEXT NOT NULL DEFAULT '[]',
                priority              INTEGER NOT NULL DEFAULT 50,
                depends_on            TEXT NOT NULL DEFAULT '[]',
                offered_to            TEXT,
                offered_at            INTEGER,
                accepted_at           INTEGER,
                rejection_reason      TEXT,
                output                TEXT,
                failure_reason        TEXT,
                progress              TEXT,
                slack_channel_id      TEXT,
                slack_thread_ts       TEXT,
                slack_user_id         TEXT,
                github_repo           TEXT,
                github_issue_number   INTEGER,
                agentmail_message_id  TEXT,
                mention_origin        TEXT,
                epic_id               TEXT,
                parent_task_id        TEXT,
                claude_session_id     TEXT,
                created_at            INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL,
                finished_at           INTEGER,
                notified_at           INTEGER
            );
            CREATE INDEX idx_tasks_agent_status ON tasks(agent_id, status);
            CREATE INDEX idx_tasks_status_priority ON tasks(status, priority);
            CREATE INDEX idx_tasks_offered_status ON tasks(offered_to, status);
            CREATE INDEX idx_tasks_epic ON tasks(epic_id);

            CREATE TABLE inbox_messages (
                id                    TEXT PRIMARY KEY,
                agent_id              TEXT NOT NULL REFERENCES agents(id),
                content               TEXT NOT NULL,
                source                TEXT NOT NULL,
                status                TEXT NOT NULL DEFAULT 'unread' CHECK(status IN
                    ('unread','processing','read','responded','delegated')),
                slack_channel_id      TEXT,
                slack_thread_ts       TEXT,
                slack_user_id         TEXT,
                matched_text          TEXT,
                delegated_to_task_id  TEXT,
                response_text         TEXT,
                processing_at         INTEGER,
                created_at            INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL
            );
            CREATE INDEX idx_inbox_agent_status ON inbox_messages(agent_id, status);

            CREATE TABLE channels (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL UNIQUE,
                is_dm            INTEGER NOT NULL DEFAULT 0,
                processing_by    TEXT,
                processing_until INTEGER,
                created_at       INTEGER NOT NULL
            );

            CREATE TABLE channel_messages (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id       TEXT NOT NULL REFERENCES channels(id),
                author_agent_id  TEXT,
                content          TEXT NOT NULL,
                reply_to_id      INTEGER,
                mentions         TEXT NOT NULL DEFAULT '[]',
                created_at       INTEGER NOT NULL
            );
            CREATE INDEX idx_channel_messages_channel ON channel_messages(channel_id, created_at);

            CREATE TABLE epics (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                goal             TEXT,
                status           TEXT NOT NULL DEFAULT 'active' CHECK(status IN
                    ('draft','active','paused','completed','cancelled')),
                stats_changed_at INTEGER,
                notified_at      INTEGER,
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
            );

            CREATE TABLE services (
                id          TEXT PRIMARY KEY,
                agent_id    TEXT NOT NULL REFERENCES agents(id),
                name        TEXT NOT NULL,
                port        INTEGER NOT NULL,
                script      TEXT,
                status      TEXT NOT NULL DEFAULT 'running',
                health_path TEXT,
                url         TEXT,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                UNIQUE(agent_id, name)
            );

            CREATE TABLE session_costs (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id            TEXT NOT NULL,
                iteration             INTEGER NOT NULL,
                task_id               TEXT,
                cost_usd              REAL NOT NULL,
                input_tokens          INTEGER NOT NULL DEFAULT 0,
                output_tokens         INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens     INTEGER,
                cache_creation_tokens INTEGER,
                model                 TEXT,
                created_at            INTEGER NOT NULL
            );
            CREATE INDEX idx_session_costs_session ON session_costs(session_id, iteration);

            CREATE TABLE session_logs (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                iteration  INTEGER NOT NULL,
                task_id    TEXT,
                cli        TEXT NOT NULL,
                lines      TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_session_logs_session ON session_logs(session_id, iteration);
        "#,
    },
    Migration {
        version: 2,
        description: "operational surface — read cursors, repos, global configs",
        sql: r#"
            CREATE TABLE channel_reads (
                channel_id           TEXT NOT NULL REFERENCES channels(id),
                agent_id             TEXT NOT NULL REFERENCES agents(id),
                last_read_message_id INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (channel_id, agent_id)
            );

            CREATE TABLE repos (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL UNIQUE,
                url            TEXT NOT NULL,
                default_branch TEXT NOT NULL DEFAULT 'main',
                agent_id       TEXT,
                created_at     INTEGER NOT NULL
            );

            CREATE TABLE global_configs (
                scope      TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, key)
            );
        "#,
    },
];

/// Run every migration that has not been applied yet.
pub fn run_all(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
            row.get(0)
        })?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        debug!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        conn.execute_batch(migration.sql).map_err(|e| {
            SwarmError::Configuration(format!(
                "migration v{} failed: {e}",
                migration.version
            ))
        })?;

        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp()
            ],
        )?;

        info!(version = migration.version, "migration applied");
    }

    Ok(())
}
