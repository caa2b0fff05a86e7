//! Round-robin server pool
//!
//! The client talks to any reachable storage node. A node is marked failed
//! on I/O error and rehabilitated by a periodic health poll; when every
//! node is marked failed the pool falls back to the full list rather than
//! refusing to try. SSE only ever connects to the coordinator.

use crate::common::NodeState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct ServerEntry {
    url: String,
    state: RwLock<NodeState>,
}

pub struct ServerPool {
    servers: Vec<ServerEntry>,
    rr: AtomicUsize,
    coordinator_url: String,
    http: reqwest::Client,
}

impl ServerPool {
    pub fn new(server_urls: Vec<String>, coordinator_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client");
        Self {
            servers: server_urls
                .into_iter()
                .map(|url| ServerEntry {
                    url,
                    state: RwLock::new(NodeState::Alive),
                })
                .collect(),
            rr: AtomicUsize::new(0),
            coordinator_url,
            http,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn coordinator_url(&self) -> &str {
        &self.coordinator_url
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Next base URL, round-robin over healthy nodes. Falls back to the
    /// full list when everything is marked failed.
    pub async fn next(&self) -> Option<String> {
        if self.servers.is_empty() {
            return None;
        }
        let start = self.rr.fetch_add(1, Ordering::Relaxed);
        for i in 0..self.servers.len() {
            let entry = &self.servers[(start + i) % self.servers.len()];
            if entry.state.read().await.is_healthy() {
                return Some(entry.url.clone());
            }
        }
        // every node failed: try them all anyway
        Some(self.servers[start % self.servers.len()].url.clone())
    }

    pub async fn mark_failed(&self, url: &str) {
        for entry in &self.servers {
            if entry.url == url {
                let mut state = entry.state.write().await;
                if state.is_healthy() {
                    tracing::warn!(server = %url, "marking server failed");
                }
                *state = NodeState::Failed;
            }
        }
    }

    pub async fn failed_count(&self) -> usize {
        let mut count = 0;
        for entry in &self.servers {
            if !entry.state.read().await.is_healthy() {
                count += 1;
            }
        }
        count
    }

    /// Probe `/api/health` on every failed node and rehabilitate responders.
    pub async fn check_failed(&self) {
        for entry in &self.servers {
            if entry.state.read().await.is_healthy() {
                continue;
            }
            let url = format!("{}/api/health", entry.url);
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(server = %entry.url, "server rehabilitated");
                    *entry.state.write().await = NodeState::Alive;
                }
                _ => {}
            }
        }
    }

    /// Background rehabilitation poll; aborted when the client shuts down.
    pub fn spawn_health_task(pool: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.check_failed().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(urls: &[&str]) -> ServerPool {
        ServerPool::new(
            urls.iter().map(|s| s.to_string()).collect(),
            "http://127.0.0.1:7100".into(),
        )
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let pool = pool(&["http://a", "http://b", "http://c"]);
        let first = pool.next().await.unwrap();
        let second = pool.next().await.unwrap();
        let third = pool.next().await.unwrap();
        let mut seen = vec![first, second, third];
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_nodes_are_skipped() {
        let pool = pool(&["http://a", "http://b"]);
        pool.mark_failed("http://a").await;
        for _ in 0..4 {
            assert_eq!(pool.next().await.unwrap(), "http://b");
        }
        assert_eq!(pool.failed_count().await, 1);
    }

    #[tokio::test]
    async fn test_all_failed_falls_back_to_full_list() {
        let pool = pool(&["http://a", "http://b"]);
        pool.mark_failed("http://a").await;
        pool.mark_failed("http://b").await;
        assert!(pool.next().await.is_some());
    }
}
