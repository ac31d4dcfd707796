//! Child process lifecycle.
//!
//! Each dispatched trigger spawns one child: the configured CLI agent
//! executable with the trigger prompt on stdin. Stdout is a stream of
//! newline-delimited JSON records which we mirror to a local log file,
//! batch up to the broker's session-log endpoint, and mine for cost
//! records. A per-PID task file tells in-child hooks which task they are
//! running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::constants::{SESSION_LOG_BATCH_LINES, SESSION_LOG_BATCH_SECS};
use crate::runner::client::BrokerClient;
use crate::{Result, SwarmError};

/// What to run and how to account for it.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Key in the supervisor's child table; the task id for task work,
    /// a synthetic id for other triggers.
    pub key: String,
    pub task_id: Option<String>,
    /// Whether the supervisor should report the task finished when the
    /// child exits (true only for dispatched task work).
    pub finish_on_exit: bool,
    pub prompt: String,
    pub session_id: String,
    pub iteration: i64,
}

/// Sent by the exit waiter when a child terminates.
#[derive(Debug)]
pub struct ExitEvent {
    pub key: String,
    pub task_id: Option<String>,
    pub finish_on_exit: bool,
    pub success: bool,
}

/// Supervisor-side handle to a running child.
pub struct ChildHandle {
    pub task_id: Option<String>,
    /// Firing this asks the exit waiter to kill the child.
    pub kill: Option<oneshot::Sender<()>>,
}

/// Spawn the child for `spec` and wire up its streams.
///
/// The returned handle stays in the supervisor's table until the exit
/// waiter delivers an [`ExitEvent`] on `exits`.
pub async fn spawn_child(
    config: &RunnerConfig,
    client: BrokerClient,
    spec: SpawnSpec,
    exits: mpsc::UnboundedSender<ExitEvent>,
) -> Result<ChildHandle> {
    let mut command = Command::new(&config.child_command);
    command
        .args(["--print", "--output-format", "stream-json", "--verbose"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if config.yolo {
        command.arg("--dangerously-skip-permissions");
    }

    let mut child = command.spawn().map_err(|e| {
        SwarmError::Configuration(format!(
            "failed to spawn child '{}': {e}",
            config.child_command
        ))
    })?;

    let pid = child.id().unwrap_or_default();
    let started_at = Utc::now().timestamp();

    // The task file is the contract with in-child hooks: written before
    // the prompt so the hook can identify its task from the first tool use.
    let task_file = if let Some(task_id) = &spec.task_id {
        Some(
            write_task_file(
                &config.log_dir,
                pid,
                task_id,
                client.agent_id(),
                started_at,
            )
            .await?,
        )
    } else {
        None
    };

    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(spec.prompt.as_bytes())
            .await
            .map_err(|e| SwarmError::Configuration(format!("failed to write child stdin: {e}")))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| SwarmError::Configuration(format!("failed to close child stdin: {e}")))?;
    }

    let log_path = log_file_path(&config.log_dir, &spec.session_id, spec.iteration);

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(stream_stdout(
            stdout,
            client.clone(),
            spec.clone(),
            log_path.clone(),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(stream_stderr(stderr, log_path, spec.key.clone()));
    }

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(wait_for_exit(child, spec.clone(), task_file, kill_rx, exits));

    info!(
        key = %spec.key,
        pid,
        session_id = %spec.session_id,
        iteration = spec.iteration,
        "child spawned"
    );

    Ok(ChildHandle {
        task_id: spec.task_id,
        kill: Some(kill_tx),
    })
}

async fn wait_for_exit(
    mut child: tokio::process::Child,
    spec: SpawnSpec,
    task_file: Option<PathBuf>,
    kill: oneshot::Receiver<()>,
    exits: mpsc::UnboundedSender<ExitEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            debug!(key = %spec.key, "terminating child");
            if let Err(e) = child.start_kill() {
                warn!(key = %spec.key, error = %e, "failed to signal child");
            }
            child.wait().await
        }
    };

    let success = status.map(|s| s.success()).unwrap_or(false);

    if let Some(path) = task_file {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "task file already gone");
        }
    }

    // The supervisor reaps on its next tick; a dropped receiver means we
    // are past shutdown and the event no longer matters.
    let _ = exits.send(ExitEvent {
        key: spec.key,
        task_id: spec.task_id,
        finish_on_exit: spec.finish_on_exit,
        success,
    });
}

/// Consume the child's NDJSON stdout: mirror to the log file, batch to
/// the broker, and mine `result` records for costs.
async fn stream_stdout(
    stdout: tokio::process::ChildStdout,
    client: BrokerClient,
    spec: SpawnSpec,
    log_path: PathBuf,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut log_file = open_log_file(&log_path).await;

    let mut buffer: Vec<String> = Vec::new();
    let mut last_flush = Instant::now();
    let mut ticker = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        echo_line(trimmed, &spec.key);
                        if let Some(file) = log_file.as_mut() {
                            let _ = file.write_all(format!("{trimmed}\n").as_bytes()).await;
                        }

                        if let Some(cost) = extract_cost(trimmed, &spec) {
                            client.push_session_cost(cost).await;
                        }

                        buffer.push(trimmed.to_string());
                        if buffer.len() >= SESSION_LOG_BATCH_LINES {
                            flush(&client, &spec, &mut buffer).await;
                            last_flush = Instant::now();
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(key = %spec.key, error = %e, "child stdout read failed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty()
                    && last_flush.elapsed() >= Duration::from_secs(SESSION_LOG_BATCH_SECS)
                {
                    flush(&client, &spec, &mut buffer).await;
                    last_flush = Instant::now();
                }
            }
        }
    }

    // Final flush on stream end.
    if !buffer.is_empty() {
        flush(&client, &spec, &mut buffer).await;
    }
}

async fn stream_stderr(stderr: tokio::process::ChildStderr, log_path: PathBuf, key: String) {
    let mut lines = BufReader::new(stderr).lines();
    let mut log_file = open_log_file(&log_path).await;

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(key = %key, "child stderr: {line}");
        if let Some(file) = log_file.as_mut() {
            let _ = file
                .write_all(format!("[stderr] {line}\n").as_bytes())
                .await;
        }
    }
}

async fn flush(client: &BrokerClient, spec: &SpawnSpec, buffer: &mut Vec<String>) {
    let lines = std::mem::take(buffer);
    client
        .push_session_logs(
            &spec.session_id,
            spec.iteration,
            spec.task_id.as_deref(),
            "claude",
            &lines,
        )
        .await;
}

/// Human-readable echo of a stdout record.
fn echo_line(line: &str, key: &str) {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(record) => {
            let kind = record["type"].as_str().unwrap_or("output");
            info!(key = %key, kind = %kind, "child: {}", summarize(&record));
        }
        Err(_) => info!(key = %key, "child: {line}"),
    }
}

fn summarize(record: &serde_json::Value) -> String {
    let text = record["result"]
        .as_str()
        .or_else(|| record["message"]["content"][0]["text"].as_str())
        .unwrap_or_default();
    let mut summary: String = text.chars().take(120).collect();
    if summary.is_empty() {
        summary = record["type"].as_str().unwrap_or("output").to_string();
    }
    summary
}

/// A `result` record with `total_cost_usd` and `usage` becomes one cost row.
fn extract_cost(line: &str, spec: &SpawnSpec) -> Option<serde_json::Value> {
    let record: serde_json::Value = serde_json::from_str(line).ok()?;
    if record["type"] != "result" {
        return None;
    }
    let cost = record["total_cost_usd"].as_f64()?;
    let usage = record.get("usage")?;

    Some(json!({
        "sessionId": spec.session_id,
        "iteration": spec.iteration,
        "taskId": spec.task_id,
        "costUsd": cost,
        "inputTokens": usage["input_tokens"].as_i64().unwrap_or(0),
        "outputTokens": usage["output_tokens"].as_i64().unwrap_or(0),
        "cacheReadTokens": usage["cache_read_input_tokens"].as_i64(),
        "cacheCreationTokens": usage["cache_creation_input_tokens"].as_i64(),
        "model": record["model"].as_str(),
    }))
}

async fn open_log_file(path: &Path) -> Option<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not open log file");
            None
        }
    }
}

fn log_file_path(log_dir: &str, session_id: &str, iteration: i64) -> PathBuf {
    Path::new(log_dir).join(format!("{session_id}-{iteration}.log"))
}

/// Atomically write the per-PID task file: write to a temp name in the
/// same directory, then rename.
pub async fn write_task_file(
    log_dir: &str,
    pid: u32,
    task_id: &str,
    agent_id: &str,
    started_at: i64,
) -> Result<PathBuf> {
    let dir = Path::new(log_dir).join("tasks");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| SwarmError::Configuration(format!("failed to create task dir: {e}")))?;

    let path = dir.join(format!("{pid}.json"));
    let tmp = dir.join(format!("{pid}.json.tmp"));

    let body = serde_json::to_vec(&json!({
        "taskId": task_id,
        "agentId": agent_id,
        "startedAt": started_at,
    }))?;

    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| SwarmError::Configuration(format!("failed to write task file: {e}")))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| SwarmError::Configuration(format!("failed to move task file: {e}")))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SpawnSpec {
        SpawnSpec {
            key: "t1".into(),
            task_id: Some("t1".into()),
            finish_on_exit: true,
            prompt: "do the thing".into(),
            session_id: "s1".into(),
            iteration: 3,
        }
    }

    #[test]
    fn extract_cost_requires_result_with_usage() {
        let line = r#"{"type":"result","total_cost_usd":0.12,
            "usage":{"input_tokens":100,"output_tokens":20,"cache_read_input_tokens":50}}"#
            .replace('\n', " ");
        let cost = extract_cost(&line, &spec()).expect("cost not extracted");
        assert_eq!(cost["costUsd"], 0.12);
        assert_eq!(cost["inputTokens"], 100);
        assert_eq!(cost["cacheReadTokens"], 50);
        assert_eq!(cost["sessionId"], "s1");
        assert_eq!(cost["iteration"], 3);

        // Non-result and cost-less records are skipped.
        assert!(extract_cost(r#"{"type":"message"}"#, &spec()).is_none());
        assert!(extract_cost(r#"{"type":"result"}"#, &spec()).is_none());
        assert!(extract_cost("not json", &spec()).is_none());
    }

    #[tokio::test]
    async fn task_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap();

        let path = write_task_file(log_dir, 4242, "task-7", "agent-9", 1_700_000_000)
            .await
            .unwrap();
        assert!(path.ends_with("tasks/4242.json"));

        let body: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(body["taskId"], "task-7");
        assert_eq!(body["agentId"], "agent-9");
        assert_eq!(body["startedAt"], 1_700_000_000);

        // No stray temp file remains.
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
