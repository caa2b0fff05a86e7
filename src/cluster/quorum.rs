//! Quorum coordination
//!
//! The node that receives a client request coordinates it: the local apply
//! counts as one success, the write fans out to the remaining replicas in
//! the preference list, and the request succeeds once W acknowledgments are
//! in. Reads fan out to every replica, wait for R valid responses, and
//! reconcile the candidates by vector clock with a last-updated tiebreak.
//!
//! Fan-out is collect-then-decide: all replica calls run concurrently under
//! one timeout, and the outcome is computed from the gathered results.

use crate::cluster::channel::PeerChannel;
use crate::cluster::message::{DataType, NodeMessage};
use crate::common::{Error, Result, Ring};
use crate::crdt::{ClockOrdering, VectorClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Result of a quorum write: which replicas acknowledged and which did not.
/// Failed replicas are the hinted-handoff candidates.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

pub struct QuorumCoordinator {
    node_id: String,
    ring: Ring,
    peers: HashMap<String, Arc<PeerChannel>>,
    r: usize,
    w: usize,
    timeout: Duration,
}

impl QuorumCoordinator {
    pub fn new(
        node_id: impl Into<String>,
        ring: Ring,
        peers: HashMap<String, Arc<PeerChannel>>,
        r: usize,
        w: usize,
        timeout: Duration,
    ) -> Self {
        let node_id = node_id.into();
        if r + w <= ring.replicas() {
            tracing::warn!(
                n = ring.replicas(),
                r,
                w,
                "R + W <= N: reads may miss the latest acknowledged write"
            );
        }
        Self {
            node_id,
            ring,
            peers,
            r,
            w,
            timeout,
        }
    }

    pub fn preference_list(&self, key: &str) -> Vec<String> {
        self.ring.preference_list(key)
    }

    /// Remote members of the preference list for `key` (everyone but us).
    fn remote_replicas(&self, key: &str) -> Vec<Arc<PeerChannel>> {
        self.preference_list(key)
            .into_iter()
            .filter(|id| *id != self.node_id)
            .filter_map(|id| self.peers.get(&id).cloned())
            .collect()
    }

    /// Replicate a write to the preference list.
    ///
    /// The caller has already applied the write locally; that apply is the
    /// first success. Returns the outcome when at least W replicas (local
    /// included) acknowledged, or `QuorumUnavailable`.
    pub async fn write(&self, key: &str, msg: NodeMessage) -> Result<WriteOutcome> {
        let replicas = self.remote_replicas(key);
        let mut outcome = WriteOutcome {
            succeeded: vec![self.node_id.clone()],
            failed: Vec::new(),
        };

        let mut tasks = JoinSet::new();
        for replica in replicas {
            let msg = msg.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let reply = replica.send_with_timeout(&msg, timeout).await;
                (replica.peer_id().to_string(), reply)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((peer, reply)) = joined else { continue };
            match reply {
                Ok(r) if r.is_ok() => outcome.succeeded.push(peer),
                Ok(r) => {
                    tracing::warn!(peer = %peer, "replica rejected {}: {:?}", msg.kind(), r.error);
                    outcome.failed.push(peer);
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, "replica call failed: {}", e);
                    outcome.failed.push(peer);
                }
            }
        }

        if outcome.succeeded.len() >= self.w {
            Ok(outcome)
        } else {
            Err(Error::QuorumUnavailable {
                needed: self.w,
                got: outcome.succeeded.len(),
            })
        }
    }

    /// Quorum read: fan READ out to every replica, require R valid
    /// responses (the local copy counts when this node is a replica), then
    /// reconcile.
    ///
    /// `local` is the coordinator's own copy, if any. Returns the winning
    /// document, or None when the quorum agrees the key is unknown.
    pub async fn read(
        &self,
        key: &str,
        data_type: DataType,
        local: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        let prefs = self.preference_list(key);
        let local_is_replica = prefs.iter().any(|id| *id == self.node_id);
        let replicas = self.remote_replicas(key);

        let msg = NodeMessage::Read {
            key: key.to_string(),
            data_type,
        };

        let mut tasks = JoinSet::new();
        for replica in replicas {
            let msg = msg.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let reply = replica.send_with_timeout(&msg, timeout).await;
                (replica.peer_id().to_string(), reply)
            });
        }

        let mut valid = 0usize;
        let mut candidates: Vec<serde_json::Value> = Vec::new();
        if local_is_replica {
            valid += 1;
            if let Some(doc) = local {
                candidates.push(doc);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((peer, reply)) = joined else { continue };
            match reply {
                Ok(r) if r.is_ok() => {
                    valid += 1;
                    if let Some(doc) = r.data {
                        if !doc.is_null() {
                            candidates.push(doc);
                        }
                    }
                }
                Ok(r) => {
                    tracing::debug!(peer = %peer, "read rejected: {:?}", r.error);
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, "read failed: {}", e);
                }
            }
        }

        if valid < self.r {
            return Err(Error::QuorumUnavailable {
                needed: self.r,
                got: valid,
            });
        }

        Ok(reconcile(candidates))
    }
}

/// Pick the winning document among replica responses: a strictly later
/// vector clock wins; concurrent clocks fall back to the greater
/// `lastUpdated` (LWW tiebreak).
fn reconcile(candidates: Vec<serde_json::Value>) -> Option<serde_json::Value> {
    let mut iter = candidates.into_iter();
    let mut winner = iter.next()?;
    for candidate in iter {
        let ordering = clock_of(&winner).compare(&clock_of(&candidate));
        let adopt = match ordering {
            ClockOrdering::Before => true,
            ClockOrdering::Concurrent => last_updated_of(&candidate) > last_updated_of(&winner),
            ClockOrdering::After | ClockOrdering::Equal => false,
        };
        if adopt {
            winner = candidate;
        }
    }
    Some(winner)
}

fn clock_of(doc: &serde_json::Value) -> VectorClock {
    doc.get("vectorClock")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn last_updated_of(doc: &serde_json::Value) -> u64 {
    doc.get("lastUpdated").and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reconcile_prefers_later_clock() {
        let older = json!({"id": "L1", "vectorClock": {"a": 1}, "lastUpdated": 500});
        let newer = json!({"id": "L1", "vectorClock": {"a": 2}, "lastUpdated": 100});
        let winner = reconcile(vec![older, newer.clone()]).unwrap();
        assert_eq!(winner, newer);
    }

    #[test]
    fn test_reconcile_concurrent_falls_back_to_lww() {
        let x = json!({"id": "I1", "vectorClock": {"x": 1}, "lastUpdated": 100});
        let y = json!({"id": "I1", "vectorClock": {"y": 1}, "lastUpdated": 200});
        let winner = reconcile(vec![x, y.clone()]).unwrap();
        assert_eq!(winner, y);
    }

    #[test]
    fn test_reconcile_keeps_dominating_candidate() {
        let newer = json!({"id": "I1", "vectorClock": {"a": 3, "b": 1}, "lastUpdated": 50});
        let older = json!({"id": "I1", "vectorClock": {"a": 1}, "lastUpdated": 999});
        let winner = reconcile(vec![newer.clone(), older]).unwrap();
        assert_eq!(winner, newer);
    }

    #[test]
    fn test_reconcile_empty() {
        assert!(reconcile(vec![]).is_none());
    }
}
