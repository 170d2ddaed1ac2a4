//! Perception Ingestion Service
//! RSS/Atom news ingestion with tracked, idempotent runs
//!
//! Features:
//! - Background runs behind a poll-able run record
//! - One active run at a time, stale runs reclaimed on the next trigger
//! - Semaphore-bounded fan-out over the source catalog
//! - URL-hash keyed, idempotent article storage
//! - Per-feed author profiles
//! - Daily brief generation
//! - Prometheus metrics, graceful shutdown on SIGTERM

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use perception_ingestion::api;
use perception_ingestion::catalog::SourceCatalog;
use perception_ingestion::orchestrator::TriggerOutcome;
use perception_ingestion::schemas::TriggerIngestionRequest;
use perception_ingestion::{AppState, Config};
use validator::Validate;

/// Perception Ingestion Service - RSS/Atom news ingestion
#[derive(Parser, Debug)]
#[command(name = "perception-ingestion")]
#[command(author = "Perception Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "RSS/Atom news ingestion runs with tracked progress")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Listen address (overrides BIND_ADDR)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Execute one ingestion run in the foreground
    Run {
        #[arg(short, long, default_value = "cli")]
        trigger: String,

        #[arg(long, default_value = "24")]
        time_window_hours: u32,

        #[arg(long, default_value = "50")]
        max_items_per_source: u32,
    },

    /// Show a run's status
    Status {
        run_id: String,
    },

    /// List the active sources in the catalog
    Sources,

    /// Build and store the daily brief for a run
    Brief {
        #[arg(long)]
        run_id: String,

        /// Brief date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Waits for Ctrl+C or SIGTERM, then notifies every subscriber
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    let _ = shutdown_tx.send(());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Perception Ingestion Service");

    let config = Config::load()?;
    config.validate()?;

    info!(
        store_type = %config.store_type,
        sources_path = %config.sources_path.display(),
        max_concurrent_fetches = config.max_concurrent_fetches,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await?,
        Commands::Run {
            trigger,
            time_window_hours,
            max_items_per_source,
        } => {
            let request = TriggerIngestionRequest {
                trigger,
                time_window_hours,
                max_items_per_source,
            };
            run_once(config, request).await?
        }
        Commands::Status { run_id } => show_status(config, &run_id).await?,
        Commands::Sources => list_sources(config).await?,
        Commands::Brief { run_id, date } => build_brief(config, &run_id, date).await?,
    }

    Ok(())
}

/// Runs the HTTP API until shutdown
async fn serve(config: Config, bind: Option<String>) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let addr = bind.unwrap_or_else(|| config.bind_addr.clone());
    let listener = TcpListener::bind(&addr).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let orchestrator = state.orchestrator.clone();
    api::serve(listener, state, shutdown_rx).await?;
    orchestrator.shutdown(config.shutdown_grace()).await;

    info!("Perception Ingestion Service stopped");
    Ok(())
}

/// Executes one run in the foreground and prints its final status
async fn run_once(config: Config, request: TriggerIngestionRequest) -> Result<()> {
    request.validate()?;
    let state = AppState::from_config(&config).await?;

    let run_id = match state.orchestrator.run_now(&request).await? {
        TriggerOutcome::Accepted(accepted) => accepted.run_id,
        TriggerOutcome::Conflict(conflict) => {
            bail!("run {} is already in progress", conflict.active_run_id)
        }
    };

    print_status(&state, &run_id).await
}

async fn show_status(config: Config, run_id: &str) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    print_status(&state, run_id).await
}

async fn print_status(state: &AppState, run_id: &str) -> Result<()> {
    match state.registry.get_status(run_id).await? {
        Some(status) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        None => bail!("run {run_id} not found"),
    }
}

async fn list_sources(config: Config) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let sources = state.catalog.load()?;

    println!("\n{:<28} {:<12} {}", "Source", "Category", "URL");
    println!("{}", "-".repeat(90));
    for source in &sources {
        println!("{:<28} {:<12} {}", source.source_id, source.category, source.url);
    }
    println!("\nTotal: {} active sources", sources.len());

    Ok(())
}

async fn build_brief(config: Config, run_id: &str, date: Option<NaiveDate>) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let date = date.unwrap_or_else(|| Utc::now().date_naive());

    let brief = state.briefs.build_and_store(run_id, date).await?;
    println!("{}", serde_json::to_string_pretty(&brief)?);

    Ok(())
}
