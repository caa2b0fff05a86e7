//! Storage node binary

use anyhow::Result;
use clap::Parser;
use listkv::{ClusterConfig, NodeServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "listkv-node")]
#[command(about = "listkv storage node - replicated shopping-list store")]
#[command(version)]
struct Args {
    /// Cluster config file (JSON); defaults apply when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port of this node (must appear in the cluster's server list)
    #[arg(short, long)]
    port: u16,

    /// Data directory override
    #[arg(long)]
    data_dir: Option<PathBuf>,

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

    let mut config = match &args.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }

    if !config.servers.contains(&args.port) {
        anyhow::bail!(
            "port {} is not in the cluster server list {:?}",
            args.port,
            config.servers
        );
    }

    tokio::fs::create_dir_all(&config.storage.data_dir).await?;

    let server = NodeServer::new(config, args.port);
    server.serve().await?;

    Ok(())
}
