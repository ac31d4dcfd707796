//! Runner supervisor.
//!
//! One process per agent, cooperatively scheduled on one event loop:
//! register, sweep paused tasks back to life, then poll forever —
//! reaping exited children, dispatching triggers into child processes,
//! and enforcing the concurrency cap. All cross-agent coordination goes
//! through the broker; the only state here is the in-memory child table.

pub mod child;
pub mod client;
pub mod prompts;

use std::collections::HashMap;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::constants::{
    RUNNER_BACKOFF_BASE_MS, RUNNER_FULL_SLEEP_MS, RUNNER_POLL_COLD_TIMEOUT_MS,
    RUNNER_POLL_WARM_TIMEOUT_MS,
};
use crate::triggers::Trigger;
use crate::Result;

use child::{spawn_child, ChildHandle, ExitEvent, SpawnSpec};
use client::BrokerClient;

pub struct Supervisor {
    config: RunnerConfig,
    client: BrokerClient,
    children: HashMap<String, ChildHandle>,
    exits_tx: mpsc::UnboundedSender<ExitEvent>,
    exits_rx: mpsc::UnboundedReceiver<ExitEvent>,
    session_id: String,
    iteration: i64,
}

impl Supervisor {
    pub fn new(config: RunnerConfig) -> Self {
        let agent_id = config
            .agent_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let client = BrokerClient::new(&config.base_url, config.api_key.clone(), &agent_id);
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();

        Self {
            config,
            client,
            children: HashMap::new(),
            exits_tx,
            exits_rx,
            session_id,
            iteration: 0,
        }
    }

    /// Register, resume paused work, then poll until a shutdown signal.
    pub async fn run(&mut self) -> Result<()> {
        let agent = self
            .client
            .register(
                &self.config.agent_name,
                self.config.is_lead,
                self.config.max_concurrent_tasks,
                None,
            )
            .await?;
        info!(
            agent_id = %agent.id,
            name = %agent.name,
            max_tasks = agent.max_tasks,
            "registered with broker"
        );

        self.resume_sweep().await;

        let mut shutdown = shutdown_signal();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
                _ = self.tick() => {}
            }
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    /// Resume paused tasks before normal polling, capacity permitting.
    async fn resume_sweep(&mut self) {
        let paused = match self.client.paused_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "resume sweep failed; continuing to poll loop");
                return;
            }
        };

        if !paused.is_empty() {
            info!(count = paused.len(), "resuming paused tasks");
        }

        for task in paused {
            while self.children.len() >= self.config.max_concurrent_tasks as usize {
                self.reap_exited().await;
                sleep(Duration::from_millis(RUNNER_FULL_SLEEP_MS)).await;
            }

            match self.client.resume(&task.id).await {
                Ok(resumed) => {
                    let prompt = prompts::resumed_task(&resumed, &self.config.base_url);
                    self.spawn(resumed.id.clone(), Some(resumed.id.clone()), true, prompt)
                        .await;
                }
                Err(e) => warn!(task_id = %task.id, error = %e, "failed to resume task"),
            }
        }
    }

    /// One supervisor cycle: ping, reap, then poll or wait.
    async fn tick(&mut self) {
        if let Err(e) = self.client.ping().await {
            debug!(error = %e, "ping failed");
        }

        self.reap_exited().await;

        if self.children.len() >= self.config.max_concurrent_tasks as usize {
            sleep(Duration::from_millis(RUNNER_FULL_SLEEP_MS)).await;
            return;
        }

        // Shorter poll when children are running so exits are observed
        // promptly; long poll when cold.
        let timeout_ms = if self.children.is_empty() {
            RUNNER_POLL_COLD_TIMEOUT_MS
        } else {
            RUNNER_POLL_WARM_TIMEOUT_MS
        };

        match self.client.poll(timeout_ms).await {
            Ok(Some(trigger)) => self.handle_trigger(trigger).await,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "poll failed; backing off");
                let jitter = rand::thread_rng().gen_range(0..RUNNER_BACKOFF_BASE_MS);
                sleep(Duration::from_millis(RUNNER_BACKOFF_BASE_MS + jitter)).await;
            }
        }
    }

    /// Non-blocking reap: drain exit events and report finished tasks.
    async fn reap_exited(&mut self) {
        while let Ok(event) = self.exits_rx.try_recv() {
            self.children.remove(&event.key);
            info!(key = %event.key, success = event.success, "child exited");

            if !event.finish_on_exit {
                continue;
            }
            let Some(task_id) = event.task_id else { continue };

            match self
                .client
                .finish(&task_id, event.success, None, exit_failure_reason(event.success))
                .await
            {
                Ok(result) if result.already_finished => {
                    debug!(task_id = %task_id, "task was already terminal at reap")
                }
                Ok(_) => {}
                Err(e) => warn!(task_id = %task_id, error = %e, "failed to report finish"),
            }
        }
    }

    async fn handle_trigger(&mut self, trigger: Trigger) {
        debug!(kind = trigger.kind(), "handling trigger");

        match trigger {
            Trigger::TaskAssigned { task, .. } => {
                let prompt = prompts::assigned_task(&task, &self.config.base_url);
                self.spawn(task.id.clone(), Some(task.id.clone()), true, prompt)
                    .await;
            }
            Trigger::TaskOffered { task, .. } => {
                let prompt = prompts::offered_task(&task, &self.config.base_url);
                let key = format!("offer-{}", task.id);
                self.spawn(key, Some(task.id.clone()), false, prompt).await;
            }
            Trigger::UnreadMentions {
                claimed_channels, ..
            } => {
                let prompt = prompts::unread_mentions(&claimed_channels, &self.config.base_url);
                let key = format!("mentions-{}", short_id());
                self.spawn(key, None, false, prompt).await;
            }
            Trigger::SlackInboxMessage { messages, .. } => {
                let prompt = prompts::inbox_messages(&messages, &self.config.base_url);
                let key = format!("inbox-{}", short_id());
                self.spawn(key, None, false, prompt).await;
            }
            Trigger::EpicProgressChanged { epics, .. } => {
                let prompt = prompts::epic_progress(&epics);
                let key = format!("epics-{}", short_id());
                self.spawn(key, None, false, prompt).await;
            }
            Trigger::PoolTasksAvailable { count } => {
                debug!(count, "racing to claim from the pool");
                self.claim_from_pool().await;
            }
        }
    }

    /// Race for a pool task. Losing every race is fine — another worker
    /// won, and the next poll recomputes the world.
    async fn claim_from_pool(&mut self) {
        let candidates = match self.client.unassigned_tasks(10).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "could not list pool tasks");
                return;
            }
        };

        for task in candidates {
            match self.client.claim(&task.id).await {
                Ok(claimed) => {
                    info!(task_id = %claimed.id, "claimed pool task");
                    // Now pending; the next poll dispatches it.
                    return;
                }
                Err(e) => debug!(task_id = %task.id, error = %e, "lost claim race"),
            }
        }
    }

    async fn spawn(
        &mut self,
        key: String,
        task_id: Option<String>,
        finish_on_exit: bool,
        prompt: String,
    ) {
        self.iteration += 1;
        let spec = SpawnSpec {
            key: key.clone(),
            task_id,
            finish_on_exit,
            prompt,
            session_id: self.session_id.clone(),
            iteration: self.iteration,
        };

        match spawn_child(&self.config, self.client.clone(), spec, self.exits_tx.clone()).await {
            Ok(handle) => {
                self.children.insert(key, handle);
            }
            Err(e) => warn!(key = %key, error = %e, "failed to spawn child"),
        }
    }

    /// Stop accepting triggers, give children the grace period, then
    /// terminate stragglers and pause their tasks so the next start can
    /// resume them. Finally mark the agent offline.
    async fn graceful_shutdown(&mut self) {
        info!(
            active = self.children.len(),
            timeout_ms = self.config.shutdown_timeout_ms,
            "graceful shutdown started"
        );

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);

        while !self.children.is_empty() && tokio::time::Instant::now() < deadline {
            self.reap_exited().await;
            if self.children.is_empty() {
                break;
            }
            sleep(Duration::from_millis(250)).await;
        }

        // Whatever is still running gets terminated; its task is paused so
        // the resume sweep picks it up after restart.
        let stragglers: Vec<ChildHandle> = self
            .children
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for mut handle in stragglers {
            if let Some(kill) = handle.kill.take() {
                let _ = kill.send(());
            }

            let Some(task_id) = handle.task_id else { continue };
            match self.client.pause(&task_id, None).await {
                Ok(_) => info!(task_id = %task_id, "task paused for restart"),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "pause failed; marking failed");
                    if let Err(e) = self
                        .client
                        .finish(
                            &task_id,
                            false,
                            None,
                            Some("runner shut down before completion".into()),
                        )
                        .await
                    {
                        warn!(task_id = %task_id, error = %e, "failed to report failure");
                    }
                }
            }
        }

        if let Err(e) = self.client.close().await {
            warn!(error = %e, "failed to mark agent offline");
        }
        info!("shutdown complete");
    }
}

fn exit_failure_reason(success: bool) -> Option<String> {
    (!success).then(|| "child process exited with a non-zero status".to_string())
}

fn short_id() -> String {
    Uuid::new_v4().to_string().chars().take(8).collect()
}

/// Resolves when SIGINT or SIGTERM arrives.
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_reason_only_on_failure() {
        assert!(exit_failure_reason(true).is_none());
        assert!(exit_failure_reason(false).is_some());
    }

    #[tokio::test]
    async fn supervisor_uses_env_identity_or_mints_one() {
        let mut config = RunnerConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            agent_id: Some("fixed-id".into()),
            agent_name: "w1".into(),
            is_lead: false,
            max_concurrent_tasks: 1,
            shutdown_timeout_ms: 1000,
            log_dir: "logs".into(),
            session_id: None,
            child_command: "claude".into(),
            yolo: false,
        };

        let supervisor = Supervisor::new(config.clone());
        assert_eq!(supervisor.client.agent_id(), "fixed-id");

        config.agent_id = None;
        let supervisor = Supervisor::new(config);
        // A fresh UUID was minted.
        assert_eq!(supervisor.client.agent_id().len(), 36);
    }
}
