use super::*;
use serial_test::serial;

fn clear_env() {
    for key in [
        "PORT",
        "HOST",
        "API_KEY",
        "DATABASE_PATH",
        "ALLOWED_ORIGINS",
        "MCP_BASE_URL",
        "AGENT_ID",
        "AGENT_NAME",
        "AGENT_IS_LEAD",
        "MAX_CONCURRENT_TASKS",
        "SHUTDOWN_TIMEOUT",
        "LOG_DIR",
        "SESSION_ID",
        "CHILD_COMMAND",
        "YOLO",
        "SLACK_SIGNING_SECRET",
        "GITHUB_WEBHOOK_SECRET",
        "AGENTMAIL_WEBHOOK_SECRET",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn broker_defaults() {
    clear_env();
    let config = BrokerConfig::from_env().unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 3013);
    assert!(config.api_key.is_none());
    assert_eq!(config.database_path, "swarm.db");
    assert!(config.slack_signing_secret.is_none());
}

#[test]
#[serial]
fn broker_rejects_short_api_key() {
    clear_env();
    std::env::set_var("API_KEY", "too-short");
    let result = BrokerConfig::from_env();
    assert!(result.is_err());
    clear_env();
}

#[test]
#[serial]
fn broker_accepts_long_api_key() {
    clear_env();
    std::env::set_var("API_KEY", "a".repeat(64));
    let config = BrokerConfig::from_env().unwrap();
    assert_eq!(config.api_key.as_deref(), Some("a".repeat(64).as_str()));
    clear_env();
}

#[test]
#[serial]
fn broker_rejects_bad_port() {
    clear_env();
    std::env::set_var("PORT", "not-a-port");
    assert!(BrokerConfig::from_env().is_err());
    clear_env();
}

#[test]
#[serial]
fn runner_defaults() {
    clear_env();
    let config = RunnerConfig::from_env().unwrap();
    assert_eq!(config.base_url, "http://127.0.0.1:3013");
    assert_eq!(config.max_concurrent_tasks, 1);
    assert_eq!(config.shutdown_timeout_ms, 30_000);
    assert_eq!(config.log_dir, "logs");
    assert_eq!(config.child_command, "claude");
    assert!(!config.yolo);
    assert!(config.agent_id.is_none());
    assert!(config.agent_name.starts_with("agent-"));
}

#[test]
#[serial]
fn runner_reads_identity_and_capacity() {
    clear_env();
    std::env::set_var("AGENT_ID", "11111111-2222-3333-4444-555555555555");
    std::env::set_var("AGENT_NAME", "scribe");
    std::env::set_var("MAX_CONCURRENT_TASKS", "3");
    std::env::set_var("SHUTDOWN_TIMEOUT", "5000");
    std::env::set_var("YOLO", "1");

    let config = RunnerConfig::from_env().unwrap();
    assert_eq!(
        config.agent_id.as_deref(),
        Some("11111111-2222-3333-4444-555555555555")
    );
    assert_eq!(config.agent_name, "scribe");
    assert_eq!(config.max_concurrent_tasks, 3);
    assert_eq!(config.shutdown_timeout_ms, 5_000);
    assert!(config.yolo);
    clear_env();
}

#[test]
#[serial]
fn runner_rejects_zero_capacity() {
    clear_env();
    std::env::set_var("MAX_CONCURRENT_TASKS", "0");
    assert!(RunnerConfig::from_env().is_err());
    clear_env();
}
