mod auth;
mod config;
mod gateway;
mod queue;
mod response;
mod shard;

use clap::{Parser, Subcommand};
use config::{GatewayConfig, QueueConfig, ShardServerConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "shale")]
#[command(about = "Minimal distributed object store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (coordinator)
    Gateway {
        /// Path to configuration file
        #[arg(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Start a storage shard
    Shard {
        /// Path to configuration file
        #[arg(short, long, default_value = "shard.yaml")]
        config: String,
    },
    /// Start the replication queue
    Queue {
        /// Path to configuration file
        #[arg(short, long, default_value = "queue.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shale=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Gateway { config } => {
            tracing::info!("Starting Shale gateway with config: {}", config);
            match GatewayConfig::from_file(&config) {
                Ok(cfg) => gateway::run_gateway(cfg).await,
                Err(error) => Err(error),
            }
        }
        Commands::Shard { config } => {
            tracing::info!("Starting Shale shard with config: {}", config);
            match ShardServerConfig::from_file(&config) {
                Ok(cfg) => shard::run_shard(cfg).await,
                Err(error) => Err(error),
            }
        }
        Commands::Queue { config } => {
            tracing::info!("Starting Shale queue with config: {}", config);
            match QueueConfig::from_file(&config) {
                Ok(cfg) => queue::run_queue(cfg).await,
                Err(error) => Err(error),
            }
        }
    };

    if let Err(error) = result {
        tracing::error!("Server error: {}", error);
        std::process::exit(1);
    }
}
