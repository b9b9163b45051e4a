//! Trade Profitability ML
//!
//! Trains leakage-safe profitability models from exported trade data and
//! serves them over HTTP.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trade_profit_ml::{
    config::{ServiceConfig, Task, TrainingConfig},
    service,
    status::{RegistryStatus, ServiceProbe},
    training,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "trade-ml")]
#[command(about = "Train and serve trade profitability models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Training config file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one training job and write its artifacts
    Train {
        /// Root directory holding one sub-directory per server
        #[arg(long)]
        data_root: Option<PathBuf>,
        /// Servers to load (comma separated; default: all)
        #[arg(long, value_delimiter = ',')]
        servers: Vec<String>,
        /// Tokens to keep (comma separated; default: all)
        #[arg(long, value_delimiter = ',')]
        tokens: Vec<String>,
        /// classification or regression
        #[arg(long)]
        task: Option<String>,
        /// Estimator family
        #[arg(long)]
        model_type: Option<String>,
        /// Where run directories and the registry are written
        #[arg(long)]
        output_root: Option<PathBuf>,
    },
    /// Start the inference service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Default model artifact
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Show the active model and probe the service
    Status {
        #[arg(long, default_value = "models")]
        output_root: PathBuf,
        #[arg(long, default_value = "http://127.0.0.1:8100")]
        service_url: String,
        /// Skip the service probe
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data_root,
            servers,
            tokens,
            task,
            model_type,
            output_root,
        } => {
            let mut config = TrainingConfig::load(cli.config.as_deref())?;
            if let Some(root) = data_root {
                config.data_root = root;
            }
            if !servers.is_empty() {
                config.servers = Some(servers);
            }
            if !tokens.is_empty() {
                config.tokens = Some(tokens);
            }
            if let Some(task) = task {
                config.task = task.parse::<Task>()?;
            }
            if let Some(model_type) = model_type {
                config.model_type = model_type;
            }
            if let Some(root) = output_root {
                config.output_root = root;
            }

            let (report, paths) = tokio::task::spawn_blocking(move || training::run_training(&config)).await??;
            tracing::info!(
                run_id = %report.run_id,
                model = %paths.model.display(),
                rows = report.dataset.rows,
                "Training complete"
            );
            println!("{}", paths.model.display());
        }
        Commands::Serve { host, port, model } => {
            let mut config = ServiceConfig::from_env();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(model) = model {
                config.default_model_path = model;
            }
            service::start_service(&config).await?;
        }
        Commands::Status {
            output_root,
            service_url,
            offline,
        } => {
            let status = RegistryStatus::read(&output_root)?;
            for line in status.lines() {
                println!("{}", line);
            }

            if !offline {
                let probe = ServiceProbe::new(&service_url)?;
                if let Some(health) = probe.fetch("/health").await {
                    println!("Service health: {}", health);
                }
                if let Some(metadata) = probe.fetch("/metadata").await {
                    let task = metadata.get("config").and_then(|c| c.get("task"));
                    println!(
                        "Service model task: {}",
                        task.and_then(|t| t.as_str()).unwrap_or("unknown")
                    );
                }
            }
        }
    }

    Ok(())
}
