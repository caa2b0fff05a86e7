//! Hinted handoff
//!
//! Writes that a replica failed to acknowledge are queued per target and
//! redelivered in FIFO order by a periodic flusher. A drain aborts for its
//! target on the first failure so ordering is preserved.

use crate::cluster::message::NodeMessage;
use crate::cluster::PeerChannel;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct HandoffQueue {
    queues: Mutex<HashMap<String, VecDeque<NodeMessage>>>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a missed write for later redelivery to `target`.
    pub async fn push(&self, target: &str, msg: NodeMessage) {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(target.to_string()).or_default();
        queue.push_back(msg);
        tracing::debug!(target, depth = queue.len(), "queued hint");
    }

    /// Total hints currently queued.
    pub async fn len(&self) -> usize {
        self.queues.lock().await.values().map(|q| q.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drain every per-target queue in FIFO order. The drain for one target
    /// stops at its first failure; remaining hints wait for the next pass.
    pub async fn flush(&self, peers: &HashMap<String, Arc<PeerChannel>>) {
        let targets: Vec<String> = {
            let queues = self.queues.lock().await;
            queues
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .map(|(t, _)| t.clone())
                .collect()
        };

        for target in targets {
            let Some(channel) = peers.get(&target) else {
                tracing::warn!(target = %target, "dropping hints for unknown peer");
                self.queues.lock().await.remove(&target);
                continue;
            };

            let mut delivered = 0usize;
            loop {
                // pop one hint at a time so a concurrent push keeps order
                let Some(msg) = self.queues.lock().await.get_mut(&target).and_then(|q| q.pop_front())
                else {
                    break;
                };

                match channel.send(&msg).await {
                    Ok(reply) if reply.is_ok() => delivered += 1,
                    Ok(reply) => {
                        tracing::warn!(
                            target = %target,
                            "peer rejected hint {}: {:?}; keeping remainder",
                            msg.kind(),
                            reply.error
                        );
                        self.requeue_front(&target, msg).await;
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(target = %target, "hint delivery failed: {}", e);
                        self.requeue_front(&target, msg).await;
                        break;
                    }
                }
            }

            if delivered > 0 {
                tracing::info!(target = %target, delivered, "flushed hinted handoff");
            }
        }
    }

    async fn requeue_front(&self, target: &str, msg: NodeMessage) {
        let mut queues = self.queues.lock().await;
        queues.entry(target.to_string()).or_default().push_front(msg);
    }
}

/// Periodic flusher task; aborted at shutdown.
pub fn spawn_flusher(
    ctx: Arc<crate::node::context::NodeContext>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            ctx.handoff.flush(&ctx.peers).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::message::NodeMessage;

    fn hint(id: &str) -> NodeMessage {
        NodeMessage::RemoveItem {
            item_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_push_and_depth() {
        let queue = HandoffQueue::new();
        assert!(queue.is_empty().await);
        queue.push("node-7003", hint("I1")).await;
        queue.push("node-7003", hint("I2")).await;
        queue.push("node-7004", hint("I3")).await;
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_flush_drops_hints_for_unknown_peer() {
        let queue = HandoffQueue::new();
        queue.push("node-gone", hint("I1")).await;
        queue.flush(&HashMap::new()).await;
        assert!(queue.is_empty().await);
    }
}
