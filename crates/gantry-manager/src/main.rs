//! Gantry - Gateway API controller

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;

use gantry_common::telemetry::{init_telemetry, TelemetryConfig};
use gantry_manager::config::{Cli, Commands, LogFormat, StaticModeArgs};
use gantry_manager::events::{event_channel, ClusterStateHandler, EventLoop};
use gantry_manager::manager::{ControllerManager, Manager};
use gantry_manager::startup::register_gateway_controllers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::StaticMode(args) => run_static_mode(args).await,
    }
}

async fn run_static_mode(args: StaticModeArgs) -> anyhow::Result<()> {
    let settings = args.validate()?;

    init_telemetry(TelemetryConfig {
        json_logs: settings.log_format == LogFormat::Json,
        ..TelemetryConfig::default()
    })?;

    tracing::info!(
        controller_name = %settings.gateway_ctlr_name,
        gateway_class = %settings.gateway_class_name,
        "Starting gantry in static mode"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let mgr = ControllerManager::from_kube(client).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let (event_tx, event_rx) = event_channel(settings.event_channel_capacity);
    register_gateway_controllers(&shutdown, &mgr, event_tx, &settings).await?;

    let state = Arc::new(ClusterStateHandler::new());
    mgr.add(Box::new(EventLoop::new(event_rx, state.clone())))?;

    mgr.start(shutdown).await?;

    tracing::info!(objects = state.len(), "Gantry shutting down");
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}
