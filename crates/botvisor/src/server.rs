use crate::acquire::{CommandInstaller, GitSourceProvider};
use crate::config::ServerConfig;
use crate::controller::Controller;
use crate::factory::{PlatformProcessManager, PlatformProcessManagerFactory};
use crate::hub::EventHub;
use crate::supervisor::ProcessSupervisor;
use crate::web;
use anyhow::{Context, Result};
use botvisor_core::ProcessManagerFactory;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serve the control plane until Ctrl-C, then stop every running bot
pub async fn run(config: ServerConfig) -> Result<()> {
    let supervisor_config = config.to_supervisor_config()?;
    for dir in [&supervisor_config.bots_dir, &supervisor_config.logs_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    info!(
        "Using {} process manager, bots in {}, logs in {}",
        PlatformProcessManagerFactory::platform_name(),
        supervisor_config.bots_dir.display(),
        supervisor_config.logs_dir.display()
    );

    let source = Arc::new(GitSourceProvider::from_config(&supervisor_config));
    let installer = Arc::new(CommandInstaller::from_config(&supervisor_config));
    let hub = EventHub::new(supervisor_config.event_capacity);
    let supervisor: Arc<ProcessSupervisor<PlatformProcessManager>> =
        Arc::new(ProcessSupervisor::new(
            PlatformProcessManagerFactory::create_process_manager(),
            supervisor_config,
            hub,
        ));
    let controller = Arc::new(Controller::new(supervisor.clone(), source, installer));

    let router = web::router(controller, Some(config.public_dir.as_path()));
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let stopped = supervisor.shutdown().await;
    info!("Server stopped, {} bots terminated", stopped);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
