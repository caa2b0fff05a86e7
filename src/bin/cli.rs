//! Client CLI
//!
//! A thin terminal front over the local-first sync engine: every mutation
//! lands in the local store immediately and is pushed to the cluster when
//! `sync` runs (or opportunistically after each command).

use anyhow::Result;
use clap::{Parser, Subcommand};
use listkv::client::{spawn_event_stream, ServerPool, SyncEngine};
use listkv::ClusterConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "listkv")]
#[command(about = "listkv client - local-first shared shopping lists")]
#[command(version)]
struct Cli {
    /// Cluster config file (JSON); defaults apply when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local data directory
    #[arg(long, default_value = "./client-data")]
    data_dir: PathBuf,

    /// Skip the network attempt after a mutation
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show all locally known lists
    Lists,

    /// Show one list with its items
    Show {
        /// List id
        list_id: String,
    },

    /// Create a list
    CreateList {
        /// List name
        name: String,
    },

    /// Delete a list (cascades to its items)
    RmList {
        /// List id
        list_id: String,
    },

    /// Add an item to a list
    Add {
        /// List id
        list_id: String,

        /// Item name
        name: String,

        /// Desired quantity
        #[arg(long, default_value = "1")]
        quantity: i64,
    },

    /// Rename an item
    Rename {
        /// Item id
        item_id: String,

        /// New name
        name: String,
    },

    /// Set an item's desired quantity
    SetQty {
        /// Item id
        item_id: String,

        /// New quantity
        quantity: i64,
    },

    /// Toggle an item's checked state
    Toggle {
        /// Item id
        item_id: String,
    },

    /// Remove an item
    Remove {
        /// Item id
        item_id: String,
    },

    /// Push pending operations and pull known lists
    Sync,

    /// Show sync status and queue depth
    Status,

    /// Follow cluster events and merge them into local state
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::default(),
    };

    let pool = Arc::new(ServerPool::new(
        config.server_urls(),
        config.coordinator_url(),
    ));
    let engine = Arc::new(SyncEngine::open(&cli.data_dir, pool.clone())?);

    match cli.command {
        Commands::Lists => {
            let lists = engine.lists()?;
            if lists.is_empty() {
                println!("no lists");
            }
            for list in lists {
                println!("{}  {}", list.id, list.name.get());
            }
        }

        Commands::Show { list_id } => {
            let (list, items) = engine.list_with_items(&list_id).await?;
            println!("{}  {}", list.id, list.name.get());
            for item in items {
                let check = if item.acquired.value() >= item.quantity.value()
                    && item.quantity.value() > 0
                {
                    "x"
                } else {
                    " "
                };
                println!(
                    "  [{}] {}  {}/{}  ({})",
                    check,
                    item.name.get(),
                    item.acquired.value(),
                    item.quantity.value(),
                    item.id
                );
            }
        }

        Commands::CreateList { name } => {
            let list = engine.create_list(name).await?;
            println!("created {}", list.id);
            try_sync(&engine, cli.offline).await;
        }

        Commands::RmList { list_id } => {
            engine.delete_list(&list_id).await?;
            println!("deleted {}", list_id);
            try_sync(&engine, cli.offline).await;
        }

        Commands::Add {
            list_id,
            name,
            quantity,
        } => {
            let item = engine.add_item(&list_id, name, quantity).await?;
            println!("added {}", item.id);
            try_sync(&engine, cli.offline).await;
        }

        Commands::Rename { item_id, name } => {
            engine.update_name(&item_id, name).await?;
            println!("renamed {}", item_id);
            try_sync(&engine, cli.offline).await;
        }

        Commands::SetQty { item_id, quantity } => {
            engine.update_quantity(&item_id, quantity).await?;
            println!("updated {}", item_id);
            try_sync(&engine, cli.offline).await;
        }

        Commands::Toggle { item_id } => {
            let item = engine.toggle(&item_id).await?;
            println!(
                "toggled {} -> {}/{}",
                item_id,
                item.acquired.value(),
                item.quantity.value()
            );
            try_sync(&engine, cli.offline).await;
        }

        Commands::Remove { item_id } => {
            engine.remove_item(&item_id).await?;
            println!("removed {}", item_id);
            try_sync(&engine, cli.offline).await;
        }

        Commands::Sync => {
            let report = engine.sync_with_backoff().await?;
            println!(
                "sync done: pushed {}, pulled {}",
                report.pushed, report.pulled
            );
            println!("status: {}", engine.status());
        }

        Commands::Status => {
            println!("client id: {}", engine.node_id());
            println!("status: {}", engine.status());
            println!("pending: {}", engine.pending_count());
        }

        Commands::Watch => {
            let _ = engine.sync().await;
            let _pool_health = ServerPool::spawn_health_task(
                pool.clone(),
                Duration::from_secs(config.pool_health_secs),
            );
            let stream = spawn_event_stream(
                engine.clone(),
                pool.clone(),
                Duration::from_secs(config.sse_health_secs),
            );
            println!("watching cluster events (ctrl-c to stop)");
            tokio::signal::ctrl_c().await?;
            stream.abort();
        }
    }

    Ok(())
}

/// Opportunistic one-shot sync after a mutation; failure keeps the edit
/// queued locally.
async fn try_sync(engine: &SyncEngine, offline: bool) {
    if offline {
        println!("status: {}", engine.status());
        return;
    }
    match engine.sync().await {
        Ok(_) => println!("status: {}", engine.status()),
        Err(_) => println!("server unreachable, status: {}", engine.status()),
    }
}
