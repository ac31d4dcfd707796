use anyhow::Result;
use clap::Parser;
use swarm_core::{config::RunnerConfig, runner::Supervisor};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runner supervisor: registers one agent with the broker, long-polls
/// for triggers, and drives child agent processes.
#[derive(Parser, Debug)]
#[command(name = "swarm-runner", version)]
struct Args {
    /// Display name for this agent (overrides AGENT_NAME).
    #[arg(long)]
    name: Option<String>,

    /// Register as the lead agent.
    #[arg(long)]
    lead: bool,

    /// Concurrency cap (overrides MAX_CONCURRENT_TASKS).
    #[arg(long)]
    max_tasks: Option<u32>,

    /// Broker base URL (overrides MCP_BASE_URL).
    #[arg(long)]
    broker: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = RunnerConfig::from_env()?;

    if let Some(name) = args.name {
        config.agent_name = name;
    }
    if args.lead {
        config.is_lead = true;
    }
    if let Some(max_tasks) = args.max_tasks {
        config.max_concurrent_tasks = max_tasks;
    }
    if let Some(broker) = args.broker {
        config.base_url = broker;
    }

    info!(
        name = %config.agent_name,
        lead = config.is_lead,
        max_tasks = config.max_concurrent_tasks,
        broker = %config.base_url,
        "starting swarm runner"
    );

    let mut supervisor = Supervisor::new(config);
    supervisor.run().await?;

    Ok(())
}
