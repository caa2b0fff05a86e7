//! Coordinator binary

use anyhow::Result;
use clap::Parser;
use listkv::{ClusterConfig, CoordinatorServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "listkv-coord")]
#[command(about = "listkv coordinator - SSE fan-out for cluster events")]
#[command(version)]
struct Args {
    /// Cluster config file (JSON); defaults apply when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::default(),
    };

    let server = CoordinatorServer::new(config);
    server.serve().await?;

    Ok(())
}
