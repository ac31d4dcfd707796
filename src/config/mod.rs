use crate::{constants, Result, SwarmError};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub runner: RunnerConfig,
}

/// Broker-side settings: bind address, auth, store path, webhook secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer key required on API calls when set.
    pub api_key: Option<String>,
    pub database_path: String,
    pub allowed_origins: Vec<String>,
    pub slack_signing_secret: Option<String>,
    pub github_webhook_secret: Option<String>,
    pub agentmail_webhook_secret: Option<String>,
}

/// Runner-side settings: identity, capacity, child command, shutdown grace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Base URL of the broker.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Stable agent id; a fresh UUID is minted when unset.
    pub agent_id: Option<String>,
    pub agent_name: String,
    pub is_lead: bool,
    pub max_concurrent_tasks: u32,
    pub shutdown_timeout_ms: u64,
    pub log_dir: String,
    pub session_id: Option<String>,
    /// Executable spawned per dispatched task.
    pub child_command: String,
    /// Skip the child's permission prompts (dangerous; opt-in).
    pub yolo: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file when present.
        match dotenv() {
            Ok(path) => tracing::debug!("Loaded .env file from: {:?}", path),
            Err(_) => tracing::debug!("No .env file found, using process environment"),
        }

        Ok(Config {
            broker: BrokerConfig::from_env()?,
            runner: RunnerConfig::from_env()?,
        })
    }
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("API_KEY").ok().filter(|k| !k.trim().is_empty());

        match &api_key {
            Some(key) if key.len() < 32 => {
                return Err(SwarmError::Configuration(
                    "API_KEY must be at least 32 characters (generate one with: openssl rand -hex 32)"
                        .to_string(),
                ));
            }
            Some(_) => tracing::info!("API authentication configured"),
            None => {
                tracing::warn!("API_KEY not set; broker will accept unauthenticated requests")
            }
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3013".to_string())
            .parse::<u16>()
            .map_err(|_| SwarmError::Configuration("PORT must be a valid port number".into()))?;

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(BrokerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            api_key,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "swarm.db".to_string()),
            allowed_origins,
            slack_signing_secret: env::var("SLACK_SIGNING_SECRET").ok().filter(|s| !s.is_empty()),
            github_webhook_secret: env::var("GITHUB_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            agentmail_webhook_secret: env::var("AGENTMAIL_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        let max_concurrent_tasks = env::var("MAX_CONCURRENT_TASKS")
            .unwrap_or_else(|_| constants::DEFAULT_MAX_CONCURRENT_TASKS.to_string())
            .parse::<u32>()
            .map_err(|_| {
                SwarmError::Configuration("MAX_CONCURRENT_TASKS must be a positive integer".into())
            })?;

        if max_concurrent_tasks == 0 {
            return Err(SwarmError::Configuration(
                "MAX_CONCURRENT_TASKS must be at least 1".into(),
            ));
        }

        let shutdown_timeout_ms = env::var("SHUTDOWN_TIMEOUT")
            .unwrap_or_else(|_| constants::DEFAULT_SHUTDOWN_TIMEOUT_MS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                SwarmError::Configuration("SHUTDOWN_TIMEOUT must be milliseconds".into())
            })?;

        let agent_name = env::var("AGENT_NAME").unwrap_or_else(|_| {
            let suffix: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
            format!("agent-{suffix}")
        });

        Ok(RunnerConfig {
            base_url: env::var("MCP_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3013".to_string()),
            api_key: env::var("API_KEY").ok().filter(|k| !k.trim().is_empty()),
            agent_id: env::var("AGENT_ID").ok().filter(|s| !s.is_empty()),
            agent_name,
            is_lead: env_flag("AGENT_IS_LEAD"),
            max_concurrent_tasks,
            shutdown_timeout_ms,
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            session_id: env::var("SESSION_ID").ok().filter(|s| !s.is_empty()),
            child_command: env::var("CHILD_COMMAND").unwrap_or_else(|_| "claude".to_string()),
            yolo: env_flag("YOLO"),
        })
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

#[cfg(test)]
mod tests;
