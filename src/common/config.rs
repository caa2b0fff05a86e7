//! Cluster configuration for listkv components
//!
//! One static JSON file describes the whole cluster: the ordered storage
//! node ports, the quorum parameters, and the coordinator endpoints. The
//! ring is fixed for the process lifetime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static cluster configuration, shared by nodes, coordinator, and clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of storage nodes in the cluster
    #[serde(default = "default_num_servers")]
    pub num_servers: usize,

    /// Ordered HTTP ports of the storage nodes
    #[serde(default = "default_servers")]
    pub servers: Vec<u16>,

    /// Quorum parameters (N, R, W)
    #[serde(default)]
    pub quorum: QuorumConfig,

    /// Coordinator endpoints
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Storage node tunables
    #[serde(default)]
    pub storage: StorageConfig,

    /// Hinted-handoff flush interval (seconds)
    #[serde(default = "default_handoff_flush")]
    pub handoff_flush_secs: u64,

    /// Client server-pool health poll interval (seconds)
    #[serde(default = "default_pool_health")]
    pub pool_health_secs: u64,

    /// SSE connection health probe interval (seconds)
    #[serde(default = "default_sse_health")]
    pub sse_health_secs: u64,

    /// Timeout for one replica call during quorum fan-out (milliseconds)
    #[serde(default = "default_replica_timeout")]
    pub replica_timeout_ms: u64,

    /// Timeout for one attempt inside the peer-channel retry loop (milliseconds)
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_ms: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_num_servers() -> usize {
    5
}
fn default_servers() -> Vec<u16> {
    vec![7001, 7002, 7003, 7004, 7005]
}
fn default_handoff_flush() -> u64 {
    30
}
fn default_pool_health() -> u64 {
    10
}
fn default_sse_health() -> u64 {
    5
}
fn default_replica_timeout() -> u64 {
    1000
}
fn default_retry_timeout() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Quorum parameters: replication factor and read/write thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuorumConfig {
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default = "default_r")]
    pub r: usize,
    #[serde(default = "default_w")]
    pub w: usize,
}

fn default_n() -> usize {
    3
}
fn default_r() -> usize {
    2
}
fn default_w() -> usize {
    2
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            n: default_n(),
            r: default_r(),
            w: default_w(),
        }
    }
}

/// Coordinator endpoints: public SSE port and the broadcast intake port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coord_http")]
    pub http_port: u16,
    #[serde(default = "default_coord_channel")]
    pub channel_port: u16,
}

fn default_coord_http() -> u16 {
    7100
}
fn default_coord_channel() -> u16 {
    7101
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            http_port: default_coord_http(),
            channel_port: default_coord_channel(),
        }
    }
}

/// Storage node tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Offset added to a node's HTTP port to obtain its replication channel port
    #[serde(default = "default_channel_offset")]
    pub channel_port_offset: u16,

    /// Base directory for node data (one subdirectory per node)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_channel_offset() -> u16 {
    1000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            channel_port_offset: default_channel_offset(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_servers: default_num_servers(),
            servers: default_servers(),
            quorum: QuorumConfig::default(),
            coordinator: CoordinatorConfig::default(),
            storage: StorageConfig::default(),
            handoff_flush_secs: default_handoff_flush(),
            pool_health_secs: default_pool_health(),
            sse_health_secs: default_sse_health(),
            replica_timeout_ms: default_replica_timeout(),
            retry_timeout_ms: default_retry_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl ClusterConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// `R + W <= N` is accepted but logged: acknowledged writes are then not
    /// guaranteed visible to the next quorum read.
    pub fn validate(&self) -> crate::Result<()> {
        if self.servers.is_empty() {
            return Err(crate::Error::InvalidConfig("servers is empty".into()));
        }
        if self.servers.len() != self.num_servers {
            return Err(crate::Error::InvalidConfig(format!(
                "num_servers is {} but servers lists {} ports",
                self.num_servers,
                self.servers.len()
            )));
        }
        let q = &self.quorum;
        if q.n == 0 || q.r == 0 || q.w == 0 {
            return Err(crate::Error::InvalidConfig(
                "quorum parameters must be positive".into(),
            ));
        }
        if q.n > self.servers.len() {
            return Err(crate::Error::InvalidConfig(format!(
                "replication factor {} exceeds cluster size {}",
                q.n,
                self.servers.len()
            )));
        }
        if q.r > q.n || q.w > q.n {
            return Err(crate::Error::InvalidConfig(
                "R and W must not exceed N".into(),
            ));
        }
        if q.r + q.w <= q.n {
            tracing::warn!(
                n = q.n,
                r = q.r,
                w = q.w,
                "R + W <= N: acknowledged writes may not be seen by the next read"
            );
        }
        Ok(())
    }

    /// Stable node id for a storage node, derived from its HTTP port.
    pub fn node_id(port: u16) -> String {
        format!("node-{}", port)
    }

    /// All node ids, in `servers` order.
    pub fn node_ids(&self) -> Vec<String> {
        self.servers.iter().map(|p| Self::node_id(*p)).collect()
    }

    /// Replication channel address for a storage node.
    pub fn channel_addr(&self, port: u16) -> String {
        format!("127.0.0.1:{}", port + self.storage.channel_port_offset)
    }

    /// HTTP base URL for a storage node.
    pub fn http_url(&self, port: u16) -> String {
        format!("http://127.0.0.1:{}", port)
    }

    /// HTTP base URLs for every storage node, in `servers` order.
    pub fn server_urls(&self) -> Vec<String> {
        self.servers.iter().map(|p| self.http_url(*p)).collect()
    }

    /// Coordinator HTTP base URL (SSE endpoint lives here).
    pub fn coordinator_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.coordinator.http_port)
    }

    /// Coordinator broadcast-intake channel address.
    pub fn coordinator_channel_addr(&self) -> String {
        format!("127.0.0.1:{}", self.coordinator.channel_port)
    }

    /// HTTP port for a node id created by [`ClusterConfig::node_id`].
    pub fn port_of(node_id: &str) -> Option<u16> {
        node_id.strip_prefix("node-").and_then(|p| p.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.num_servers, 5);
        assert_eq!(config.servers.len(), 5);
        assert_eq!(config.quorum.n, 3);
        assert_eq!(config.quorum.r, 2);
        assert_eq!(config.quorum.w, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_json() {
        let json = r#"{ "num_servers": 3, "servers": [8001, 8002, 8003] }"#;
        let config: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.servers, vec![8001, 8002, 8003]);
        assert_eq!(config.quorum.n, 3);
        assert_eq!(config.handoff_flush_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_servers() {
        let config = ClusterConfig {
            num_servers: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_n() {
        let mut config = ClusterConfig::default();
        config.quorum.n = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_id_round_trip() {
        assert_eq!(ClusterConfig::node_id(7001), "node-7001");
        assert_eq!(ClusterConfig::port_of("node-7001"), Some(7001));
        assert_eq!(ClusterConfig::port_of("garbage"), None);
    }

    #[test]
    fn test_channel_addr_uses_offset() {
        let config = ClusterConfig::default();
        assert_eq!(config.channel_addr(7001), "127.0.0.1:8001");
    }
}
