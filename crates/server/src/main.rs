use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleetwatch_server::db::{MemoryStore, PgStore, Store};
use fleetwatch_server::server::config::ServerConfig;
use fleetwatch_server::server::retention::run_metrics_retention;
use fleetwatch_server::server::status_sweeper::StatusSweeper;
use fleetwatch_server::web::{create_axum_router, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C.");
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
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let server_config = Arc::new(ServerConfig::load(args.config.as_deref())?);
    init_logging(&server_config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting fleetwatch server.");

    // --- Store Setup ---
    let store: Arc<dyn Store> = match server_config.database_url.as_deref() {
        Some(url) => {
            let pg = PgStore::connect(url, server_config.max_db_connections).await?;
            pg.migrate().await?;
            info!("Connected to Postgres.");
            Arc::new(pg)
        }
        None => {
            warn!("No DATABASE_URL configured; using the in-memory store. Data will not survive a restart.");
            Arc::new(MemoryStore::new())
        }
    };

    if server_config.dashboard_token.is_none() {
        warn!("No DASHBOARD_TOKEN configured; any bearer token is accepted on /api.");
    }

    let app_state = Arc::new(AppState::new(store.clone(), server_config.clone()));

    // --- Background Tasks ---
    let sweeper = Arc::new(StatusSweeper::new(
        store.clone(),
        app_state.events.clone(),
        server_config.staleness_threshold_seconds,
    ));
    let sweep_task = tokio::spawn(
        sweeper.run(server_config.status_sweep_interval_seconds),
    );

    let evaluation_task = tokio::spawn(
        app_state
            .evaluation_service
            .clone()
            .start_periodic_evaluation(server_config.alert_evaluation_interval_seconds),
    );

    let retention_task = tokio::spawn(run_metrics_retention(
        store.clone(),
        server_config.metrics_retention_hours,
        server_config.retention_interval_seconds,
    ));

    // --- Axum HTTP Server Setup ---
    let addr: SocketAddr = server_config.listen_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening");

    let app = create_axum_router(app_state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_task.abort();
    evaluation_task.abort();
    retention_task.abort();
    store.close().await;
    info!("Server stopped.");
    Ok(())
}
