//! audited-store server.
//!
//! Boots the HTTP host around the data-access layer.
//!
//! ```text
//! CLI args → config (TOML + APP_* overrides + validation)
//!          → tracing subscriber (environment-dependent format)
//!          → metrics endpoint (optional)
//!          → persistence backend (memory | sqlite)
//!          → HttpServer (request logging, timeout, body limit)
//!          → graceful shutdown on SIGINT/SIGTERM
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use audited_store::config::{load_or_default, Environment};
use audited_store::http::{AppState, HttpServer};
use audited_store::lifecycle::{shutdown_on_signal, Shutdown};
use audited_store::observability::{logging, metrics, LoggerFactory};
use audited_store::persistence::open_backend;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "audited-store", version, about = "Audited data-access service")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the deployment environment (development | production).
    #[arg(short, long)]
    environment: Option<Environment>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    if let Some(environment) = cli.environment {
        config.observability.environment = environment;
    }

    logging::init(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.observability.environment,
        "audited-store starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = ?config.database.backend,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let backend = open_backend(&config.database)?;
    let loggers = LoggerFactory::for_environment(config.observability.environment);
    let state = AppState::new(backend, loggers);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    HttpServer::new(&config, state).run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
