//! Storage node server wiring

use crate::cluster::{PeerChannel, QuorumCoordinator};
use crate::common::{ClusterConfig, Result, Ring};
use crate::node::context::NodeContext;
use crate::node::{gossip, handoff, http};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct NodeServer {
    config: ClusterConfig,
    port: u16,
}

impl NodeServer {
    pub fn new(config: ClusterConfig, port: u16) -> Self {
        Self { config, port }
    }

    pub async fn serve(self) -> Result<()> {
        let node_id = ClusterConfig::node_id(self.port);
        let channel_addr = self.config.channel_addr(self.port);
        let data_dir = self.config.storage.data_dir.join(&node_id);

        tracing::info!("Starting storage node: {}", node_id);
        tracing::info!("  HTTP API: 127.0.0.1:{}", self.port);
        tracing::info!("  Replication: {}", channel_addr);
        tracing::info!("  Data path: {}", data_dir.display());
        tracing::info!(
            "  Quorum: N={} R={} W={}",
            self.config.quorum.n,
            self.config.quorum.r,
            self.config.quorum.w
        );

        let mut ctx = NodeContext::open(node_id.clone(), &data_dir)?;

        // Per-peer request channels (one per other node, plus the coordinator)
        let retry_timeout = Duration::from_millis(self.config.retry_timeout_ms);
        let mut peers: HashMap<String, Arc<PeerChannel>> = HashMap::new();
        for &port in &self.config.servers {
            if port == self.port {
                continue;
            }
            let peer_id = ClusterConfig::node_id(port);
            let channel =
                PeerChannel::new(peer_id.clone(), self.config.channel_addr(port), retry_timeout);
            peers.insert(peer_id, Arc::new(channel));
        }

        let ring = Ring::new(&self.config.node_ids(), self.config.quorum.n);
        ctx.quorum = Some(QuorumCoordinator::new(
            node_id.clone(),
            ring,
            peers.clone(),
            self.config.quorum.r,
            self.config.quorum.w,
            Duration::from_millis(self.config.replica_timeout_ms),
        ));
        ctx.peers = peers;
        ctx.coordinator = Some(Arc::new(PeerChannel::new(
            "coordinator",
            self.config.coordinator_channel_addr(),
            retry_timeout,
        )));
        let ctx = Arc::new(ctx);

        // Replication listener
        let gossip_listener = TcpListener::bind(&channel_addr).await?;
        let gossip_task = tokio::spawn(gossip::serve(ctx.clone(), gossip_listener));

        // Hinted-handoff flusher
        let flusher_task = handoff::spawn_flusher(
            ctx.clone(),
            Duration::from_secs(self.config.handoff_flush_secs),
        );

        // Public HTTP API
        let http_listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        let router = http::create_router(ctx.clone());
        let http_server = axum::serve(http_listener, router);

        tracing::info!("✓ Storage node ready");

        tokio::select! {
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!("signal handler error: {}", e);
                }
                tracing::info!("shutting down");
            }
        }

        // Listener loops stop first; the durable store closes last
        gossip_task.abort();
        flusher_task.abort();
        ctx.store.flush()?;
        Ok(())
    }
}
