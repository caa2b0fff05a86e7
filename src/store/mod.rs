//! Durable local store
//!
//! Every node and every client owns one sled database with four trees:
//! `lists`, `items` (plus a `list_id` index tree), `pending` (client
//! operation queue), and `meta` (node identity, sync watermark). Values are
//! JSON documents of the internal CRDT types.
//!
//! Deleting a list removes the list row and every item row with that
//! `list_id` in one transaction. Pending operations are keyed by timestamp
//! so the queue drains in client-declared order; acknowledging (`mark_synced`)
//! and cleanup (`clear_synced`) are separate steps, so a crash between them
//! only wastes a resend.

use crate::common::{Error, Result};
use crate::crdt::{Item, List};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use sled::Transactional;
use std::path::Path;

/// A queued client mutation awaiting acknowledgment from the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOp {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OpType,
    pub data: serde_json::Value,
    pub timestamp: u64,
    pub synced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    CreateList,
    DeleteList,
    AddItem,
    UpdateName,
    UpdateQuantity,
    ToggleCheck,
    RemoveItem,
}

impl PendingOp {
    pub fn new(op_type: OpType, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            op_type,
            data,
            // strictly increasing so same-millisecond ops keep append order
            timestamp: crate::common::monotonic_millis(),
            synced: false,
        }
    }

    fn key(&self) -> Vec<u8> {
        pending_key(self.timestamp, &self.id)
    }
}

fn pending_key(timestamp: u64, id: &str) -> Vec<u8> {
    format!("{:020}:{}", timestamp, id).into_bytes()
}

fn index_key(list_id: &str, item_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(list_id.len() + item_id.len() + 1);
    key.extend_from_slice(list_id.as_bytes());
    key.push(0);
    key.extend_from_slice(item_id.as_bytes());
    key
}

fn index_prefix(list_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(list_id.len() + 1);
    key.extend_from_slice(list_id.as_bytes());
    key.push(0);
    key
}

pub struct Store {
    db: sled::Db,
    lists: sled::Tree,
    items: sled::Tree,
    items_by_list: sled::Tree,
    pending: sled::Tree,
    meta: sled::Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            lists: db.open_tree("lists")?,
            items: db.open_tree("items")?,
            items_by_list: db.open_tree("items_by_list")?,
            pending: db.open_tree("pending")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    /// Flush all trees to disk. Called last during shutdown.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // === Lists ===

    /// Upsert a list.
    pub fn save_list(&self, list: &List) -> Result<()> {
        let doc = serde_json::to_vec(list)?;
        self.lists.insert(list.id.as_bytes(), doc)?;
        Ok(())
    }

    pub fn get_list(&self, id: &str) -> Result<Option<List>> {
        match self.lists.get(id.as_bytes())? {
            Some(doc) => Ok(Some(serde_json::from_slice(&doc)?)),
            None => Ok(None),
        }
    }

    pub fn all_lists(&self) -> Result<Vec<List>> {
        let mut lists = Vec::new();
        for entry in self.lists.iter() {
            let (_, doc) = entry?;
            lists.push(serde_json::from_slice(&doc)?);
        }
        Ok(lists)
    }

    /// Delete a list and every item with its `list_id` atomically.
    /// Returns false when the list was not present.
    pub fn delete_list(&self, id: &str) -> Result<bool> {
        if self.lists.get(id.as_bytes())?.is_none() {
            return Ok(false);
        }

        let mut item_ids: Vec<String> = Vec::new();
        for entry in self.items_by_list.scan_prefix(index_prefix(id)) {
            let (_, item_id) = entry?;
            item_ids.push(String::from_utf8_lossy(&item_id).to_string());
        }

        let list_id = id.to_string();
        (&self.lists, &self.items, &self.items_by_list)
            .transaction(|(lists, items, index)| {
                lists.remove(list_id.as_bytes())?;
                for item_id in &item_ids {
                    items.remove(item_id.as_bytes())?;
                    index.remove(index_key(&list_id, item_id))?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<()>| Error::Internal(format!("delete_list: {:?}", e)))?;
        Ok(true)
    }

    // === Items ===

    /// Upsert an item and its `list_id` index entry.
    pub fn save_item(&self, item: &Item) -> Result<()> {
        let doc = serde_json::to_vec(item)?;
        let id = item.id.clone();
        let idx = index_key(&item.list_id, &item.id);
        (&self.items, &self.items_by_list)
            .transaction(move |(items, index)| {
                items.insert(id.as_bytes(), doc.clone())?;
                index.insert(idx.clone(), id.as_bytes())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| Error::Internal(format!("save_item: {:?}", e)))?;
        Ok(())
    }

    pub fn get_item(&self, id: &str) -> Result<Option<Item>> {
        match self.items.get(id.as_bytes())? {
            Some(doc) => Ok(Some(serde_json::from_slice(&doc)?)),
            None => Ok(None),
        }
    }

    pub fn all_items(&self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        for entry in self.items.iter() {
            let (_, doc) = entry?;
            items.push(serde_json::from_slice(&doc)?);
        }
        Ok(items)
    }

    pub fn items_for_list(&self, list_id: &str) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        for entry in self.items_by_list.scan_prefix(index_prefix(list_id)) {
            let (_, item_id) = entry?;
            if let Some(doc) = self.items.get(&item_id)? {
                items.push(serde_json::from_slice(&doc)?);
            }
        }
        Ok(items)
    }

    /// Returns false when the item was not present.
    pub fn delete_item(&self, id: &str) -> Result<bool> {
        let Some(item) = self.get_item(id)? else {
            return Ok(false);
        };
        let item_id = item.id.clone();
        let idx = index_key(&item.list_id, &item.id);
        (&self.items, &self.items_by_list)
            .transaction(move |(items, index)| {
                items.remove(item_id.as_bytes())?;
                index.remove(idx.clone())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| Error::Internal(format!("delete_item: {:?}", e)))?;
        Ok(true)
    }

    // === Pending operations (client queue) ===

    pub fn append_pending(&self, op: &PendingOp) -> Result<()> {
        let doc = serde_json::to_vec(op)?;
        self.pending.insert(op.key(), doc)?;
        Ok(())
    }

    /// Unsynced operations in ascending timestamp order. The snapshot is a
    /// single ordered scan, so a concurrent append never splits the queue.
    pub fn pending_ops(&self) -> Result<Vec<PendingOp>> {
        let mut ops = Vec::new();
        for entry in self.pending.iter() {
            let (_, doc) = entry?;
            let op: PendingOp = serde_json::from_slice(&doc)?;
            if !op.synced {
                ops.push(op);
            }
        }
        Ok(ops)
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.pending_ops()?.len())
    }

    /// Flag one operation as acknowledged by the cluster.
    pub fn mark_synced(&self, op: &PendingOp) -> Result<()> {
        let mut acked = op.clone();
        acked.synced = true;
        self.pending.insert(op.key(), serde_json::to_vec(&acked)?)?;
        Ok(())
    }

    /// Drop every acknowledged operation. Separate from `mark_synced` so a
    /// crash in between only costs a duplicate (idempotent) resend.
    pub fn clear_synced(&self) -> Result<usize> {
        let mut cleared = 0;
        for entry in self.pending.iter() {
            let (key, doc) = entry?;
            let op: PendingOp = serde_json::from_slice(&doc)?;
            if op.synced {
                self.pending.remove(key)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    // === Metadata ===

    /// Stable identity for this store's owner; created on first use.
    pub fn get_or_create_node_id(&self, prefix: &str) -> Result<String> {
        if let Some(existing) = self.meta.get(b"node_id")? {
            return Ok(String::from_utf8_lossy(&existing).to_string());
        }
        let id = format!(
            "{}-{}",
            prefix,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        self.meta.insert(b"node_id", id.as_bytes())?;
        Ok(id)
    }

    pub fn last_sync(&self) -> Result<Option<u64>> {
        match self.meta.get(b"last_sync")? {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_ref()
                    .try_into()
                    .map_err(|_| Error::Corrupted("last_sync watermark".into()))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn set_last_sync(&self, timestamp: u64) -> Result<()> {
        self.meta.insert(b"last_sync", timestamp.to_be_bytes().to_vec())?;
        Ok(())
    }
}
