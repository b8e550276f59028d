use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use batchgate::config::{AppConfig, Overrides};
use batchgate::context::AppContext;
use batchgate::engine::MemoryJobRepository;
use batchgate::logging::{self, LogConfig};
use batchgate::store::LocalFileStore;
use batchgate::web::WebServer;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "batchgate")]
#[command(about = "REST administration gateway for a batch job engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve(ServeArgs),
    /// Query a running gateway's health endpoint
    Status(StatusArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Configuration file (defaults to ./batchgate.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args)]
struct StatusArgs {
    /// Base URL of the gateway, including any base path
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = AppConfig::new(args.config.as_deref(), Some(&args.overrides))?;
            logging::init(LogConfig {
                json: config.json_logs,
                verbose: config.verbose,
            });
            run_server(config).await.context("Failed to run gateway")?
        }
        Commands::Status(args) => run_status(&args.url)
            .await
            .context("Failed to check status of gateway")?,
    }

    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.files.staging_directory)
        .await
        .with_context(|| {
            format!(
                "Failed to create staging directory {}",
                config.files.staging_directory.display()
            )
        })?;

    let mut repository = MemoryJobRepository::new(config.jobs.clone());
    if config.simulation.enabled {
        repository = repository.with_simulation(Duration::from_millis(config.simulation.step_duration_ms));
    }
    let store = LocalFileStore::new(config.files.staging_directory.clone());

    tracing::info!(
        jobs = config.jobs.len(),
        staging = %config.files.staging_directory.display(),
        simulation = config.simulation.enabled,
        "Starting gateway"
    );

    let ctx = AppContext::new(config, Arc::new(repository), Arc::new(store));
    let server = Arc::new(WebServer::new(ctx));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal_server.shutdown();
        }
    });

    server.start().await
}

async fn run_status(url: &str) -> Result<()> {
    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::get(&health_url)
        .await
        .with_context(|| format!("Failed to reach {}", health_url))?
        .error_for_status()?
        .json()
        .await?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
