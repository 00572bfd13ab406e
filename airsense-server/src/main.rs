use std::sync::Arc;

use airsense_core::monitoring::PrepareOutcome;
use airsense_core::{AirsenseConfig, PrometheusSink, Telemetry};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use airsense_server::{batch, http};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "airsense.toml")]
    config: String,

    /// Check the model and data files, then exit
    #[arg(long)]
    health: bool,

    /// Generate the drift and classification reports, then exit
    #[arg(long, conflicts_with_all = ["health", "prepare_reference"])]
    update_reports: bool,

    /// Build the reference dataset from the full sensor export, then exit
    #[arg(long, conflicts_with = "health")]
    prepare_reference: bool,

    /// Overwrite an existing reference dataset
    #[arg(long, requires = "prepare_reference")]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match AirsenseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging: RUST_LOG wins, then the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        if batch::health_check(&config) {
            println!("✅ Airsense health check passed");
            return Ok(());
        }
        std::process::exit(1);
    }

    if args.prepare_reference {
        match batch::prepare_reference(&config, args.force)? {
            PrepareOutcome::AlreadyExists { path } => {
                println!("Reference data already exists at {} (use --force)", path.display())
            }
            PrepareOutcome::Created { path, rows } => {
                println!("✅ Reference data written to {} ({} rows)", path.display(), rows)
            }
        }
        return Ok(());
    }

    if args.update_reports {
        let outcome = batch::update_reports(&config, Telemetry::noop())?;
        println!("{}: {}", outcome.status(), outcome.message());
        return Ok(());
    }

    let sink = Arc::new(PrometheusSink::new()?);
    let state = Arc::new(http::AppState::from_config(config, Telemetry::new(sink)));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
