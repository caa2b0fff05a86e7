//! Consistent hashing for replica placement
//!
//! Node ids and keys share one 160-bit hash (SHA-1). The ring is the sorted
//! sequence of node hashes; the preference list for a key is the first N
//! distinct nodes at or after the key's hash, wrapping at the end.

use sha1::{Digest, Sha1};

/// 160-bit ring position
pub type RingPos = [u8; 20];

/// Hash a node id or key onto the ring
pub fn ring_hash(value: &str) -> RingPos {
    let mut hasher = Sha1::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

/// Fixed consistent-hash ring over the cluster's node ids.
///
/// The membership is static per process lifetime; nodes are placed once at
/// construction and the ring is never rebalanced at runtime.
#[derive(Debug, Clone)]
pub struct Ring {
    /// (position, node id), sorted by position
    points: Vec<(RingPos, String)>,
    replicas: usize,
}

impl Ring {
    pub fn new(node_ids: &[String], replicas: usize) -> Self {
        let mut points: Vec<(RingPos, String)> = node_ids
            .iter()
            .map(|id| (ring_hash(id), id.clone()))
            .collect();
        points.sort();
        points.dedup_by(|a, b| a.1 == b.1);
        Self { points, replicas }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// The N distinct nodes responsible for `key`, clockwise from its hash.
    pub fn preference_list(&self, key: &str) -> Vec<String> {
        self.preference_list_n(key, self.replicas)
    }

    /// Preference list with an explicit replica count.
    pub fn preference_list_n(&self, key: &str, n: usize) -> Vec<String> {
        if self.points.is_empty() {
            return Vec::new();
        }

        let pos = ring_hash(key);
        let start = self
            .points
            .partition_point(|(p, _)| *p < pos);

        let mut out: Vec<String> = Vec::with_capacity(n.min(self.points.len()));
        for i in 0..self.points.len() {
            let (_, node) = &self.points[(start + i) % self.points.len()];
            if !out.contains(node) {
                out.push(node.clone());
            }
            if out.len() == n {
                break;
            }
        }
        out
    }

    /// The primary replica for a key.
    pub fn primary(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let pos = ring_hash(key);
        let start = self.points.partition_point(|(p, _)| *p < pos);
        Some(self.points[start % self.points.len()].1.as_str())
    }

    /// Is `node_id` in the preference list for `key`?
    pub fn is_replica(&self, key: &str, node_id: &str) -> bool {
        self.preference_list(key).iter().any(|n| n == node_id)
    }
}
