//! Coordinator tests: BROADCAST intake over the request/reply channel
//! fanning out to SSE subscribers.

use listkv::cluster::message::NodeMessage;
use listkv::cluster::PeerChannel;
use listkv::coordinator::{server, SseHub};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_broadcast_reaches_subscribers() {
    let hub = Arc::new(SseHub::new(16));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::intake_loop(hub.clone(), listener));

    let mut rx = hub.subscribe();

    // a storage node announces a change over its coordinator channel
    let channel = PeerChannel::new("node-a", addr.to_string(), Duration::from_millis(500));
    let reply = channel
        .send(&NodeMessage::Broadcast {
            event: "item-added".into(),
            data: json!({"id": "I1", "listId": "L1"}),
        })
        .await
        .unwrap();
    assert!(reply.is_ok());

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event, "item-added");
    assert_eq!(event.data["listId"], "L1");
}

#[tokio::test]
async fn test_non_broadcast_messages_are_rejected() {
    let hub = Arc::new(SseHub::new(16));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::intake_loop(hub.clone(), listener));

    let channel = PeerChannel::new("node-a", addr.to_string(), Duration::from_millis(500));
    let reply = channel
        .send(&NodeMessage::DeleteList {
            list_id: "L1".into(),
        })
        .await
        .unwrap();
    assert!(!reply.is_ok());
}

#[tokio::test]
async fn test_sequential_broadcasts_keep_order_per_subscriber() {
    let hub = Arc::new(SseHub::new(64));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::intake_loop(hub.clone(), listener));

    let mut rx = hub.subscribe();
    let channel = PeerChannel::new("node-a", addr.to_string(), Duration::from_millis(500));

    for i in 0..10 {
        channel
            .send(&NodeMessage::Broadcast {
                event: "item-quantity-updated".into(),
                data: json!({"seq": i}),
            })
            .await
            .unwrap();
    }

    for i in 0..10 {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data["seq"], i);
    }
}
