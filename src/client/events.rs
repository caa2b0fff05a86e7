//! Server-sent event consumer
//!
//! Maintains one streaming connection to the coordinator, parses the
//! event-stream framing, and hands every named event to the sync engine
//! for CRDT merge. The connection has its own health probe and its own
//! reconnection timer; a dropped stream never affects local mutations.

use crate::client::pool::ServerPool;
use crate::client::sync::SyncEngine;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// Spawn the long-lived SSE consumer task.
pub fn spawn_event_stream(
    engine: Arc<SyncEngine>,
    pool: Arc<ServerPool>,
    probe_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // streaming connection: connect timeout only, no total deadline
        let http = match reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("SSE client construction failed: {}", e);
                return;
            }
        };

        loop {
            let url = format!("{}/api/events", pool.coordinator_url());
            match connect_and_consume(&engine, &pool, &http, &url, probe_interval).await {
                Ok(()) => tracing::info!("SSE stream ended, reconnecting"),
                Err(e) => tracing::warn!("SSE stream failed: {}", e),
            }
            tokio::time::sleep(probe_interval).await;
        }
    })
}

async fn connect_and_consume(
    engine: &SyncEngine,
    pool: &ServerPool,
    http: &reqwest::Client,
    url: &str,
    probe_interval: Duration,
) -> crate::Result<()> {
    let resp = http
        .get(url)
        .header("Accept", "text/event-stream")
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(crate::Error::Http(format!(
            "event stream: {}",
            resp.status()
        )));
    }
    tracing::info!(url, "SSE connected");

    let mut stream = Box::pin(resp.bytes_stream());
    let mut parser = FrameParser::default();
    let mut probe = tokio::time::interval(probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    probe.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            chunk = stream.next() => {
                let Some(chunk) = chunk else {
                    return Ok(()); // server closed the stream
                };
                let bytes = chunk.map_err(crate::Error::from)?;
                for (event, data) in parser.feed(&String::from_utf8_lossy(&bytes)) {
                    dispatch(engine, &event, &data).await;
                }
            }
            _ = probe.tick() => {
                let health = format!("{}/api/health", pool.coordinator_url());
                let alive = matches!(
                    http.get(&health)
                        .timeout(Duration::from_secs(5))
                        .send()
                        .await,
                    Ok(resp) if resp.status().is_success()
                );
                if !alive {
                    return Err(crate::Error::ConnectionFailed(
                        "coordinator health probe failed".into(),
                    ));
                }
            }
        }
    }
}

async fn dispatch(engine: &SyncEngine, event: &str, data: &str) {
    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(event, "unparseable event payload: {}", e);
            return;
        }
    };
    if let Err(e) = engine.apply_server_event(event, parsed).await {
        tracing::warn!(event, "event merge failed: {}", e);
    }
}

/// Incremental text/event-stream parser: `event:`/`data:` fields accumulate
/// until a blank line completes the frame; comment lines (heartbeats) are
/// dropped.
#[derive(Default)]
struct FrameParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameParser {
    fn feed(&mut self, chunk: &str) -> Vec<(String, String)> {
        self.buffer.push_str(chunk);
        let mut complete = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.event.take() {
                    if !self.data.is_empty() {
                        complete.push((event, self.data.join("\n")));
                    }
                }
                self.data.clear();
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.trim().to_string());
            }
            // anything else (":" heartbeat comments, "id:", "retry:") is ignored
        }

        complete
    }
}
