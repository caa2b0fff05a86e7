//! Shared state of one storage node
//!
//! Everything a request handler needs lives behind one `Arc<NodeContext>`:
//! the durable store, the in-memory item set, the peer channels, the quorum
//! coordinator, and the hinted-handoff queue. The item set is guarded by a
//! single async mutex; every write path goes through it, which serializes
//! conflicting writes.

use crate::cluster::{NodeMessage, PeerChannel, QuorumCoordinator};
use crate::crdt::AworSet;
use crate::node::handoff::HandoffQueue;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct NodeContext {
    pub node_id: String,
    pub store: Store,
    pub set: Mutex<AworSet>,
    /// None until the replication mesh is wired up (single-node mode, tests)
    pub quorum: Option<QuorumCoordinator>,
    pub peers: HashMap<String, Arc<PeerChannel>>,
    pub handoff: HandoffQueue,
    /// Channel to the SSE coordinator, when one is configured
    pub coordinator: Option<Arc<PeerChannel>>,
}

impl NodeContext {
    /// Open a node's durable store and hydrate the in-memory set.
    /// Replication wiring (quorum, peers, coordinator) is attached by the
    /// caller; a bare context serves purely local reads and writes.
    pub fn open(node_id: impl Into<String>, data_dir: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let node_id = node_id.into();
        let store = Store::open(data_dir)?;
        let items = store.all_items()?;
        let set = AworSet::hydrate(node_id.clone(), items);
        Ok(Self {
            node_id,
            store,
            set: Mutex::new(set),
            quorum: None,
            peers: HashMap::new(),
            handoff: HandoffQueue::new(),
            coordinator: None,
        })
    }

    /// Replicate a state change to the key's preference list and queue
    /// hints for every replica that did not acknowledge.
    ///
    /// The local apply has already happened; quorum failure leaves local
    /// state in place and is surfaced to the caller.
    pub async fn replicate(&self, key: &str, msg: NodeMessage) -> crate::Result<()> {
        let Some(quorum) = &self.quorum else {
            return Ok(());
        };
        let outcome = quorum.write(key, msg.clone()).await?;
        for target in outcome.failed {
            self.handoff.push(&target, msg.clone()).await;
        }
        Ok(())
    }

    /// Fire-and-forget broadcast to the cluster coordinator for SSE fan-out.
    pub fn broadcast(self: &Arc<Self>, event: &str, data: serde_json::Value) {
        let Some(coordinator) = self.coordinator.clone() else {
            return;
        };
        let msg = NodeMessage::Broadcast {
            event: event.to_string(),
            data,
        };
        let event = event.to_string();
        tokio::spawn(async move {
            if let Err(e) = coordinator.send(&msg).await {
                tracing::warn!(event = %event, "broadcast to coordinator failed: {}", e);
            }
        });
    }
}
