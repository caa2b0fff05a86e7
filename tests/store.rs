//! Durable store tests: persistence across reopen, the cascade delete, and
//! the pending-operation queue contract.

use listkv::crdt::{Item, List};
use listkv::store::{OpType, PendingOp, Store};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_lists_and_items_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::open(dir.path()).unwrap();
        store.save_list(&List::new("L1", "Weekly", "n1")).unwrap();
        store
            .save_item(&Item::new("I1", "L1", "Milk", 2, "n1"))
            .unwrap();
        store.flush().unwrap();
    }

    {
        let store = Store::open(dir.path()).unwrap();
        let list = store.get_list("L1").unwrap().unwrap();
        assert_eq!(list.name.get(), "Weekly");
        let item = store.get_item("I1").unwrap().unwrap();
        assert_eq!(item.quantity.value(), 2);
        assert_eq!(item.list_id, "L1");
    }
}

#[test]
fn test_save_is_upsert() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let mut item = Item::new("I1", "L1", "Milk", 2, "n1");
    store.save_item(&item).unwrap();
    item.quantity.set_value("n1", 5);
    store.save_item(&item).unwrap();

    assert_eq!(store.get_item("I1").unwrap().unwrap().quantity.value(), 5);
    assert_eq!(store.all_items().unwrap().len(), 1);
}

#[test]
fn test_delete_list_cascades_to_items() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    store.save_list(&List::new("L1", "Weekly", "n1")).unwrap();
    store.save_list(&List::new("L2", "Party", "n1")).unwrap();
    store
        .save_item(&Item::new("I1", "L1", "Milk", 1, "n1"))
        .unwrap();
    store
        .save_item(&Item::new("I2", "L1", "Eggs", 6, "n1"))
        .unwrap();
    store
        .save_item(&Item::new("I3", "L2", "Cake", 1, "n1"))
        .unwrap();

    assert!(store.delete_list("L1").unwrap());

    assert!(store.get_list("L1").unwrap().is_none());
    assert!(store.get_item("I1").unwrap().is_none());
    assert!(store.get_item("I2").unwrap().is_none());
    // the other list is untouched
    assert!(store.get_list("L2").unwrap().is_some());
    assert_eq!(store.items_for_list("L2").unwrap().len(), 1);

    // second delete reports absence
    assert!(!store.delete_list("L1").unwrap());
}

#[test]
fn test_items_for_list_uses_index() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    for i in 0..10 {
        let list_id = if i % 2 == 0 { "L1" } else { "L2" };
        store
            .save_item(&Item::new(format!("I{}", i), list_id, "x", 1, "n1"))
            .unwrap();
    }

    assert_eq!(store.items_for_list("L1").unwrap().len(), 5);
    assert_eq!(store.items_for_list("L2").unwrap().len(), 5);
    assert_eq!(store.items_for_list("L3").unwrap().len(), 0);
}

#[test]
fn test_pending_queue_orders_by_timestamp() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let ops: Vec<PendingOp> = (0..20)
        .map(|i| PendingOp::new(OpType::AddItem, json!({ "seq": i })))
        .collect();
    for op in ops.iter().rev() {
        // append out of order on purpose; the scan must sort by timestamp
        store.append_pending(op).unwrap();
    }

    let queued = store.pending_ops().unwrap();
    assert_eq!(queued.len(), 20);
    for (i, op) in queued.iter().enumerate() {
        assert_eq!(op.data["seq"], i as u64, "queue must drain in op order");
    }
}

#[test]
fn test_mark_then_clear_synced() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let first = PendingOp::new(OpType::CreateList, json!({"id": "L1"}));
    let second = PendingOp::new(OpType::AddItem, json!({"id": "I1"}));
    store.append_pending(&first).unwrap();
    store.append_pending(&second).unwrap();

    store.mark_synced(&first).unwrap();
    // acknowledged ops leave the unsynced view immediately
    let remaining = store.pending_ops().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second.id);

    // cleanup is a separate step
    assert_eq!(store.clear_synced().unwrap(), 1);
    assert_eq!(store.pending_count().unwrap(), 1);
}

#[test]
fn test_crash_between_mark_and_clear_resends_only_unsynced() {
    let dir = TempDir::new().unwrap();

    let acked = PendingOp::new(OpType::CreateList, json!({"id": "L1"}));
    let unacked = PendingOp::new(OpType::AddItem, json!({"id": "I1"}));
    {
        let store = Store::open(dir.path()).unwrap();
        store.append_pending(&acked).unwrap();
        store.append_pending(&unacked).unwrap();
        store.mark_synced(&acked).unwrap();
        store.flush().unwrap();
        // crash here: clear_synced never ran
    }

    let store = Store::open(dir.path()).unwrap();
    let queued = store.pending_ops().unwrap();
    assert_eq!(queued.len(), 1, "the acked op must not be resent");
    assert_eq!(queued[0].id, unacked.id);
}

#[test]
fn test_node_identity_is_stable() {
    let dir = TempDir::new().unwrap();

    let first = {
        let store = Store::open(dir.path()).unwrap();
        store.get_or_create_node_id("client").unwrap()
    };
    let second = {
        let store = Store::open(dir.path()).unwrap();
        store.get_or_create_node_id("client").unwrap()
    };

    assert!(first.starts_with("client-"));
    assert_eq!(first, second);
}

#[test]
fn test_last_sync_watermark() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    assert!(store.last_sync().unwrap().is_none());
    store.set_last_sync(12345).unwrap();
    assert_eq!(store.last_sync().unwrap(), Some(12345));
}
