//! Client sync engine tests: the local-first contract, the offline queue
//! draining against a real in-process node, and SSE event merging.

use listkv::client::{ServerPool, SyncEngine};
use listkv::node::{http, NodeContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Reserve a loopback address that nothing listens on yet.
async fn reserve_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Start a single storage node (no replication mesh) on `addr`.
async fn start_node(addr: SocketAddr) -> (Arc<NodeContext>, TempDir) {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(NodeContext::open("node-test", dir.path()).unwrap());
    let listener = TcpListener::bind(addr).await.unwrap();
    let router = http::create_router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (ctx, dir)
}

fn pool_for(addr: SocketAddr) -> Arc<ServerPool> {
    Arc::new(ServerPool::new(
        vec![format!("http://{}", addr)],
        format!("http://{}", addr),
    ))
}

#[tokio::test]
async fn test_mutations_succeed_offline_and_queue() {
    let addr = reserve_addr().await;
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::open(dir.path(), pool_for(addr)).unwrap();

    let list = engine.create_list("Groceries").await.unwrap();
    let bread = engine.add_item(&list.id, "Bread", 2).await.unwrap();
    engine.add_item(&list.id, "Milk", 1).await.unwrap();
    engine.toggle(&bread.id).await.unwrap();

    // everything is readable locally despite no server
    let (_, items) = engine.list_with_items(&list.id).await.unwrap();
    assert_eq!(items.len(), 2);
    let toggled = items.iter().find(|i| i.id == bread.id).unwrap();
    assert_eq!(toggled.acquired.value(), 2);

    // and the queue reflects the unsent work
    assert!(engine.sync().await.is_err());
    assert_eq!(engine.pending_count(), 4);
    assert_eq!(engine.status().to_string(), "queue(4)");
}

#[tokio::test]
async fn test_offline_queue_drains_on_reconnect() {
    let addr = reserve_addr().await;
    let client_dir = TempDir::new().unwrap();

    // session 1: disconnected client edits a list
    let (list_id, bread_id, milk_id) = {
        let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
        let list = engine.create_list("Weekend").await.unwrap();
        let bread = engine.add_item(&list.id, "Bread", 2).await.unwrap();
        let milk = engine.add_item(&list.id, "Milk", 1).await.unwrap();
        engine.add_item(&list.id, "Eggs", 6).await.unwrap();
        engine.toggle(&bread.id).await.unwrap();
        engine.update_quantity(&milk.id, 4).await.unwrap();

        assert!(engine.sync().await.is_err(), "server is unreachable");
        assert_eq!(engine.pending_count(), 6);
        (list.id.clone(), bread.id.clone(), milk.id.clone())
    };

    // the server comes up; a new session reopens the same local store
    let (server_ctx, _server_dir) = start_node(addr).await;
    let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
    assert_eq!(engine.pending_count(), 6, "queue survives restart");

    let report = engine.sync().await.unwrap();
    assert!(report.pushed >= 6);
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.status().to_string(), "synced");

    // server end state equals the client's local state
    let list = server_ctx.store.get_list(&list_id).unwrap().unwrap();
    assert_eq!(list.name.get(), "Weekend");
    let items = server_ctx.store.items_for_list(&list_id).unwrap();
    assert_eq!(items.len(), 3);
    let bread = server_ctx.store.get_item(&bread_id).unwrap().unwrap();
    assert_eq!(bread.quantity.value(), 2);
    assert_eq!(bread.acquired.value(), 2, "toggle must reach the server");
    let milk = server_ctx.store.get_item(&milk_id).unwrap().unwrap();
    assert_eq!(milk.quantity.value(), 4, "quantity update must reach the server");

    // a second pass has nothing left to say
    let report = engine.sync().await.unwrap();
    assert_eq!(report.pushed, 0);
}

#[tokio::test]
async fn test_resend_after_ack_is_tolerated() {
    let addr = reserve_addr().await;
    let (server_ctx, _server_dir) = start_node(addr).await;
    let client_dir = TempDir::new().unwrap();

    // session 1 syncs fully
    {
        let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
        let list = engine.create_list("Dup").await.unwrap();
        engine.add_item(&list.id, "Salt", 1).await.unwrap();
        engine.sync().await.unwrap();
    }

    // session 2 pushes its full state again (create + add re-sent); the
    // server answers 409 and the sync still succeeds
    let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
    engine.sync().await.unwrap();
    assert_eq!(engine.status().to_string(), "synced");
    assert_eq!(server_ctx.store.all_lists().unwrap().len(), 1);
    assert_eq!(server_ctx.store.all_items().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_tolerates_not_found() {
    let addr = reserve_addr().await;
    let (_server_ctx, _server_dir) = start_node(addr).await;
    let client_dir = TempDir::new().unwrap();

    let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
    let list = engine.create_list("Ephemeral").await.unwrap();
    // deleted before the server ever heard of the creation; the create is
    // pushed first, the delete follows, both in client order
    engine.delete_list(&list.id).await.unwrap();
    engine.sync().await.unwrap();
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test]
async fn test_first_sync_pulls_server_items() {
    let addr = reserve_addr().await;
    let (server_ctx, _server_dir) = start_node(addr).await;
    let client_dir = TempDir::new().unwrap();

    // client A creates the list and an item on the server
    let list_id = {
        let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
        let list = engine.create_list("Shared").await.unwrap();
        engine.sync().await.unwrap();
        list.id
    };

    // another client adds an item server-side
    use listkv::node::apply::{self, AddItemInput};
    apply::add_item(
        &server_ctx,
        &list_id,
        AddItemInput {
            id: Some("I-remote".into()),
            name: "Butter".into(),
            quantity: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // a fresh session of client A pulls the known list back and merges
    let engine = SyncEngine::open(client_dir.path(), pool_for(addr)).unwrap();
    engine.sync().await.unwrap();
    let (_, items) = engine.list_with_items(&list_id).await.unwrap();
    assert!(items.iter().any(|i| i.id == "I-remote"));
}

#[tokio::test]
async fn test_event_merge_and_privacy_boundary() {
    let addr = reserve_addr().await;
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::open(dir.path(), pool_for(addr)).unwrap();

    let list = engine.create_list("Mine").await.unwrap();
    let item = engine.add_item(&list.id, "Rice", 1).await.unwrap();

    // a concurrent quantity update from another client, pushed over SSE
    let mut incoming = item.clone();
    incoming.quantity.set_value("client-other", 9);
    incoming.vector_clock.increment("client-other");
    engine
        .apply_server_event("item-quantity-updated", serde_json::json!(incoming.view()))
        .await
        .unwrap();

    let (_, items) = engine.list_with_items(&list.id).await.unwrap();
    assert_eq!(items[0].quantity.value(), 9);
    assert_eq!(items[0].vector_clock.get("client-other"), 1);

    // an event for a list this client never loaded is ignored
    let foreign = listkv::crdt::Item::new("I-x", "L-foreign", "Spy", 1, "client-other");
    engine
        .apply_server_event("item-added", serde_json::json!(foreign.view()))
        .await
        .unwrap();
    assert!(engine.lists().unwrap().iter().all(|l| l.id != "L-foreign"));
    let err = engine.list_with_items("L-foreign").await.unwrap_err();
    assert!(matches!(err, listkv::Error::NotFound(_)));
}

#[tokio::test]
async fn test_causally_older_event_is_ignored() {
    let addr = reserve_addr().await;
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::open(dir.path(), pool_for(addr)).unwrap();

    let list = engine.create_list("Mine").await.unwrap();
    let item = engine.add_item(&list.id, "Tea", 1).await.unwrap();
    let stale = item.clone();

    // local moves ahead
    engine.update_quantity(&item.id, 5).await.unwrap();

    // replaying the original add state must not roll the counter back
    engine
        .apply_server_event("item-updated", serde_json::json!(stale.view()))
        .await
        .unwrap();
    let (_, items) = engine.list_with_items(&list.id).await.unwrap();
    assert_eq!(items[0].quantity.value(), 5);
}
