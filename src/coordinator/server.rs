//! Coordinator server wiring

use crate::cluster::message::{NodeMessage, Reply};
use crate::common::{ClusterConfig, Result};
use crate::coordinator::sse::{self, SseHub};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct CoordinatorServer {
    config: ClusterConfig,
}

impl CoordinatorServer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let http_addr = format!("127.0.0.1:{}", self.config.coordinator.http_port);
        let channel_addr = self.config.coordinator_channel_addr();

        tracing::info!("Starting coordinator");
        tracing::info!("  SSE endpoint: http://{}/api/events", http_addr);
        tracing::info!("  Broadcast intake: {}", channel_addr);

        let hub = Arc::new(SseHub::new(256));

        // Broadcast intake from storage nodes
        let intake_listener = TcpListener::bind(&channel_addr).await?;
        let intake_task = tokio::spawn(intake_loop(hub.clone(), intake_listener));

        // Public SSE endpoint
        let http_listener = TcpListener::bind(&http_addr).await?;
        let router = sse::create_router(hub);
        let http_server = axum::serve(http_listener, router);

        tracing::info!("✓ Coordinator ready");

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

        intake_task.abort();
        Ok(())
    }
}

/// Accept-loop for node connections delivering BROADCAST envelopes.
pub async fn intake_loop(hub: Arc<SseHub>, listener: TcpListener) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("broadcast accept failed: {}", e);
                continue;
            }
        };
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(hub, stream).await {
                tracing::debug!(peer = %peer_addr, "broadcast connection closed: {}", e);
            }
        });
    }
}

async fn handle_connection(hub: Arc<SseHub>, stream: TcpStream) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let reply = match serde_json::from_str::<NodeMessage>(line.trim()) {
            Ok(NodeMessage::Broadcast { event, data }) => {
                hub.publish(event, data);
                Reply::ok()
            }
            Ok(other) => Reply::error(format!(
                "coordinator only accepts BROADCAST, got {}",
                other.kind()
            )),
            Err(e) => Reply::error(format!("malformed message: {}", e)),
        };
        let out = serde_json::to_string(&reply).unwrap_or_else(|_| r#"{"status":"error"}"#.into());
        write.write_all(out.as_bytes()).await?;
        write.write_all(b"\n").await?;
        write.flush().await?;
    }
}
