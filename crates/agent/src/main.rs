use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleetwatch_agent::agent_modules::communication::{GatewayApi, HttpGateway};
use fleetwatch_agent::agent_modules::config::load_agent_config;
use fleetwatch_agent::agent_modules::enrollment::ensure_api_key;
use fleetwatch_agent::agent_modules::metrics::{host_name, MetricsCollector};
use fleetwatch_agent::agent_modules::poll_loop::{LocalHost, PollLoop};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = "agent_config.toml")]
    config: PathBuf,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "agent.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn wait_for_shutdown(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received.");
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let mut config = load_agent_config(&args.config)?;
    init_logging(&config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting fleetwatch agent...");

    let mut collector = MetricsCollector::new();
    let system_info = collector.system_info();

    let api_key = ensure_api_key(&mut config, &args.config, host_name(), system_info.clone())
        .await
        .inspect_err(|e| error!(error = %e, "Enrollment failed."))?;

    let gateway = Arc::new(HttpGateway::new(
        &config.server_url,
        api_key,
        config.request_timeout(),
    )?);

    // The first authenticated call doubles as a credential check.
    match gateway.push_system_info(&system_info).await {
        Ok(ack) => info!(server_id = %ack.server_id, "Gateway accepted agent credentials."),
        Err(e) if e.is_fatal() => {
            error!(error = %e, "Gateway rejected this agent. Check api_key in the config.");
            return Err(e.into());
        }
        Err(e) => warn!(error = %e, "Could not reach gateway yet, continuing."),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown(shutdown_tx));

    let host = LocalHost::new(collector, config.watched_services.clone());
    PollLoop::new(gateway, host, &config).run(shutdown_rx).await;

    info!("Agent stopped.");
    Ok(())
}
