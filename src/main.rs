use std::env;
use std::path::PathBuf;

use anyhow::Context;

use agent_supervisor::cli::EventRenderer;
use agent_supervisor::logging::{self, LoggingConfig};
use agent_supervisor::{AgentDescriptor, LifecycleStatus, Supervisor, SupervisorConfig};

const USAGE: &str = "usage: agent-supervisor <descriptor.{json,yaml}> [supervisor.json]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging system
    let log_guard = logging::init_logging(&LoggingConfig::from_env())?;

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(descriptor_path) = args.first().map(PathBuf::from) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = match args.get(1) {
        Some(path) => SupervisorConfig::from_file(path)
            .with_context(|| format!("failed to load supervisor config {}", path))?,
        None => SupervisorConfig::default(),
    }
    .apply_env();

    let descriptor = AgentDescriptor::from_file(&descriptor_path)
        .with_context(|| format!("failed to load descriptor {}", descriptor_path.display()))?;

    tracing::info!("=== Agent Supervisor Starting ===");

    let supervisor = Supervisor::new(config);
    let subscription = supervisor.subscribe(&descriptor.agent_id);
    let renderer = EventRenderer::new().with_timestamps(true);

    supervisor
        .start(&descriptor)
        .await
        .with_context(|| format!("failed to start agent {}", descriptor.agent_id))?;

    let outcome = tokio::select! {
        outcome = renderer.run(subscription) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; stopping agent");
            None
        }
    };

    supervisor.shutdown().await;

    tracing::info!("=== Agent Supervisor Shutting Down ===");

    // Flush file logs before a non-zero exit
    drop(log_guard);
    if outcome == Some(LifecycleStatus::Crashed) {
        std::process::exit(1);
    }
    Ok(())
}
