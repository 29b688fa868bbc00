//! Standalone binary for running a `MasterServer`.
//!
//! ```bash
//! dagmaster-server --env production
//! dagmaster-server --config ./config --print-config
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dagmaster::{load_config, CommandSource, ConfigSources, InMemoryCommandSource, MasterServer};
use dagmaster_coord::{LoggingAlerter, ZkCoordService};
use dagmaster_engine::{NoopWorkerGateway, SysinfoResourceGate};
use dagmaster_store::PostgresProcessStore;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dagmaster-server", version, about = "Master execution core server")]
struct Cli {
    /// Directory holding base/ and environments/ config layers.
    #[arg(long, default_value = "config")]
    config: String,

    /// Environment name selecting config/environments/{name}.
    #[arg(long)]
    env: Option<String>,

    /// Resolve and print the effective configuration, then exit.
    #[arg(long)]
    print_config: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg!(debug_assertions) {
        subscriber.init();
    } else {
        subscriber.json().init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let mut sources = ConfigSources {
        base_path: cli.config.clone(),
        ..ConfigSources::default()
    };
    if let Some(env) = cli.env.clone() {
        sources.environment = env;
    }

    let config = match load_config(&sources) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.print_config {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "failed to serialize resolved configuration");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    info!(version = env!("CARGO_PKG_VERSION"), host = %config.master.host, "starting dagmaster-server");

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "failed to connect to process store database");
            return ExitCode::FAILURE;
        }
    };
    let store = Arc::new(PostgresProcessStore::new(pool));

    let coord = match ZkCoordService::connect(&config.coordination.connect_string, std::time::Duration::from_secs(10))
    {
        Ok(coord) => Arc::new(coord),
        Err(err) => {
            error!(error = %err, "failed to connect to coordination service");
            return ExitCode::FAILURE;
        }
    };

    let alerter = Arc::new(LoggingAlerter);
    let gateway = Arc::new(NoopWorkerGateway);
    let resource_gate = Arc::new(SysinfoResourceGate::new(dagmaster_engine::ResourceThresholds {
        cpu_threshold: config.master.task_resource_cpu_threshold,
        mem_threshold: config.master.task_resource_mem_threshold,
    }));
    let command_source: Arc<dyn CommandSource> = Arc::new(InMemoryCommandSource::new());

    let server = Arc::new(MasterServer::new(
        config,
        store,
        coord,
        alerter,
        gateway,
        resource_gate,
        command_source,
    ));

    let run_handle = tokio::spawn(Arc::clone(&server).run());

    shutdown_signal().await;
    info!("shutdown signal received, stopping gracefully");

    if let Err(err) = server.stop().await {
        error!(error = %err, "error during graceful shutdown");
        return ExitCode::FAILURE;
    }

    match run_handle.await {
        Ok(Ok(())) => {
            info!("dagmaster-server shutdown complete");
            ExitCode::SUCCESS
        }
        Ok(Err(err)) => {
            error!(error = %err, "server loop exited with an error");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(error = %err, "server task panicked");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
