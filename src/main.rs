use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aggregator::aggregation::AggregationService;
use aggregator::config::Config;
use aggregator::error::AggregatorErrorTrait;
use aggregator::models::AggregationRequest;
use aggregator::server::AggregationServer;

#[derive(Parser)]
#[command(
    name = "aggregator",
    version,
    about = "Batching aggregation gateway for shipments, track and pricing lookups",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the aggregation API
    Serve {
        /// Override the bind address
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Run a single aggregation and print the JSON result
    Aggregate {
        /// Comma-separated shipment order numbers
        #[arg(long)]
        shipments: Option<String>,

        /// Comma-separated track order numbers
        #[arg(long)]
        track: Option<String>,

        /// Comma-separated ISO-2 country codes
        #[arg(long)]
        pricing: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = aggregator::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            tracing::info!(
                bind = %config.server.bind_address,
                downstream = %config.downstream.base_url,
                "Starting serve command"
            );
            serve(config).await?;
        }

        Commands::Aggregate {
            shipments,
            track,
            pricing,
        } => {
            let request = AggregationRequest::from_csv(
                shipments.as_deref(),
                track.as_deref(),
                pricing.as_deref(),
            );
            tracing::info!(identifiers = request.len(), "Starting aggregate command");
            aggregate(config, request).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("aggregator=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("aggregator={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let server = AggregationServer::from_config(&config)?;

    if let Err(e) = server.start_with_shutdown(shutdown_signal()).await {
        tracing::error!(
            error = %e,
            category = e.category().as_str(),
            recoverable = e.is_recoverable(),
            "Aggregation server failed"
        );
        return Err(e).context("Aggregation server failed");
    }

    Ok(())
}

async fn aggregate(config: Config, request: AggregationRequest) -> Result<()> {
    let service = AggregationService::from_config(&config)?;
    let aggregation = service.aggregate(&request).await;

    println!("{}", serde_json::to_string_pretty(&aggregation)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
