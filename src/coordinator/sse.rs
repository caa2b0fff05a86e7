//! SSE fan-out hub
//!
//! One broadcast channel feeds every connected subscriber. Slow consumers
//! that lag past the channel capacity miss events and resynchronize through
//! their next pull; clients decide state by vector clock, not by arrival.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Heartbeat interval for SSE keep-alive comments.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// One event on its way to subscribers.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: String,
    pub data: serde_json::Value,
}

pub struct SseHub {
    tx: broadcast::Sender<OutboundEvent>,
}

impl SseHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Multicast one event to every connected subscriber.
    pub fn publish(&self, event: impl Into<String>, data: serde_json::Value) {
        let event = event.into();
        let receivers = self.tx.receiver_count();
        tracing::debug!(event = %event, receivers, "fan-out");
        // send only fails when nobody is subscribed, which is fine
        let _ = self.tx.send(OutboundEvent { event, data });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Creates the coordinator's HTTP router (SSE + health).
pub fn create_router(hub: Arc<SseHub>) -> Router {
    Router::new()
        .route("/api/events", get(events))
        .route("/api/health", get(health))
        .with_state(hub)
}

async fn health(State(hub): State<Arc<SseHub>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "service": "coordinator",
        "subscribers": hub.subscriber_count(),
        "timestamp": crate::common::timestamp_now_millis(),
    }))
}

async fn events(
    State(hub): State<Arc<SseHub>>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let rx = hub.subscribe();
    tracing::info!(subscribers = hub.subscriber_count(), "SSE subscriber connected");

    let stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(out) => Some(Ok(Event::default().event(out.event).data(out.data.to_string()))),
            // lagged subscriber: skip, the client resyncs by pull
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = SseHub::new(16);
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish("item-added", json!({"id": "I1"}));

        let ev = rx1.recv().await.unwrap();
        assert_eq!(ev.event, "item-added");
        assert_eq!(ev.data["id"], "I1");
        let ev = rx2.recv().await.unwrap();
        assert_eq!(ev.event, "item-added");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let hub = SseHub::new(16);
        hub.publish("list-created", json!({}));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
