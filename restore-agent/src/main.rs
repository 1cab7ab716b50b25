//! Restore Agent - Main entry point
//!
//! Serves the restore hook over HTTP, or runs a single restore from a cluster
//! definition file with `restore-agent restore --cluster <FILE>`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use restore_agent::{
    api, cluster::decode_cluster, config::Config, daemon::shutdown::ShutdownCoordinator,
    executor::{RestoreContext, RestoreExecutor},
    store::{control_plane::ControlPlaneClient, credentials::Environment},
    utils,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one restore and exit
    Restore {
        /// Cluster definition (JSON)
        #[arg(long, value_name = "FILE")]
        cluster: PathBuf,

        /// Write the recovery directive here instead of printing the response
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    // Initialize start time for uptime tracking
    api::health::init_start_time();

    tracing::info!(
        "Starting restore-agent v{} (agent_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );

    let context = Arc::new(config.restore_context(Environment::from_process())?);
    let shutdown_coordinator = ShutdownCoordinator::new();

    match args.command {
        Some(Command::Restore { cluster, output }) => {
            run_once(context, shutdown_coordinator, cluster, output).await
        }
        None => serve(config, args.port, context, shutdown_coordinator).await,
    }
}

async fn run_once(
    context: Arc<RestoreContext<ControlPlaneClient>>,
    shutdown_coordinator: ShutdownCoordinator,
    cluster_path: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let raw = tokio::fs::read(&cluster_path)
        .await
        .with_context(|| format!("reading cluster definition {}", cluster_path.display()))?;
    let cluster = decode_cluster(serde_json::from_slice(&raw)?)?;

    // A signal cancels the attempt, which stops the running tool gracefully
    let executor = RestoreExecutor::with_cancel(context, shutdown_coordinator.token().child_token());
    let signals = tokio::spawn(async move { shutdown_coordinator.wait_for_signal().await });
    let result = executor.execute(&cluster).await;
    signals.abort();
    let response = result?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, &response.restore_config)
                .await
                .with_context(|| format!("writing recovery directive {}", path.display()))?;
            tracing::info!("Recovery directive written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&response)?),
    }

    Ok(())
}

async fn serve(
    config: Config,
    port: Option<u16>,
    context: Arc<RestoreContext<ControlPlaneClient>>,
    shutdown_coordinator: ShutdownCoordinator,
) -> Result<()> {
    // Determine port
    let port = port.unwrap_or(config.agent.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app_state = api::create_app_state(context, shutdown_coordinator.token(), config.agent.id.clone());
    let app = api::create_router_with_state(app_state);

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health endpoint: http://{}/health", addr);
    tracing::info!("Restore endpoint: http://{}/restore", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server_token = shutdown_coordinator.token();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await });
    let server_handle = tokio::spawn(async move { server.await });

    // Wait for shutdown signal; this cancels every running restore
    shutdown_coordinator.wait_for_signal().await;

    // Running barman-cloud processes get their grace period before the server is dropped
    let grace = std::time::Duration::from_secs(config.tools.termination_grace_secs + 5);
    match tokio::time::timeout(grace, server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
