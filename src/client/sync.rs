//! Client sync engine
//!
//! Local-first contract: every mutation commits to the local store and
//! appends a pending operation before any network attempt. A single guard
//! keeps at most one sync running; the loop pushes the queue in timestamp
//! order against any reachable node, pulls known lists back on the first
//! sync of a session, and backs off exponentially on failure.

use crate::client::pool::ServerPool;
use crate::common::{retry_with_backoff, timestamp_now_millis, Error, Result};
use crate::crdt::{AworSet, ClockOrdering, Item, ItemField, List, ListView};
use crate::store::{OpType, PendingOp, Store};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Backoff schedule for failed syncs.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_ATTEMPTS: usize = 5;

/// What the UI shows about the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    Syncing,
    Queued(usize),
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Queued(n) => write!(f, "queue({})", n),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    /// Another sync was already running; nothing happened
    pub skipped: bool,
}

pub struct SyncEngine {
    node_id: String,
    store: Store,
    set: Mutex<AworSet>,
    pool: Arc<ServerPool>,
    /// At most one sync at a time
    sync_guard: Mutex<()>,
    first_sync_done: AtomicBool,
    syncing: AtomicBool,
}

impl SyncEngine {
    pub fn open(data_dir: impl AsRef<std::path::Path>, pool: Arc<ServerPool>) -> Result<Self> {
        let store = Store::open(data_dir)?;
        let node_id = store.get_or_create_node_id("client")?;
        let set = AworSet::hydrate(node_id.clone(), store.all_items()?);
        Ok(Self {
            node_id,
            store,
            set: Mutex::new(set),
            pool,
            sync_guard: Mutex::new(()),
            first_sync_done: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn status(&self) -> SyncStatus {
        if self.syncing.load(Ordering::Relaxed) {
            return SyncStatus::Syncing;
        }
        match self.store.pending_count() {
            Ok(0) => SyncStatus::Synced,
            Ok(n) => SyncStatus::Queued(n),
            Err(_) => SyncStatus::Synced,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.store.pending_count().unwrap_or(0)
    }

    // === Local-first mutations ===

    pub async fn create_list(&self, name: impl Into<String>) -> Result<List> {
        let list = List::new(uuid::Uuid::new_v4().to_string(), name, &self.node_id);
        self.store.save_list(&list)?;
        self.enqueue(
            OpType::CreateList,
            json!({
                "id": list.id,
                "name": list.name.get(),
                "vectorClock": list.vector_clock,
                "createdAt": list.created_at,
                "lastUpdated": list.last_updated,
            }),
        )?;
        Ok(list)
    }

    pub async fn delete_list(&self, id: &str) -> Result<()> {
        if self.store.get_list(id)?.is_none() {
            return Err(Error::NotFound(format!("list {}", id)));
        }
        let mut set = self.set.lock().await;
        set.remove_list_items(id);
        drop(set);
        self.store.delete_list(id)?;
        self.enqueue(OpType::DeleteList, json!({ "id": id }))?;
        Ok(())
    }

    pub async fn add_item(
        &self,
        list_id: &str,
        name: impl Into<String>,
        quantity: i64,
    ) -> Result<Item> {
        if self.store.get_list(list_id)?.is_none() {
            return Err(Error::NotFound(format!("list {}", list_id)));
        }
        if quantity < 0 {
            return Err(Error::BadRequest("quantity must be non-negative".into()));
        }
        let item = Item::new(
            uuid::Uuid::new_v4().to_string(),
            list_id,
            name,
            quantity,
            &self.node_id,
        );
        let mut set = self.set.lock().await;
        set.add(item.clone());
        drop(set);
        self.store.save_item(&item)?;
        self.enqueue(
            OpType::AddItem,
            json!({
                "id": item.id,
                "listId": item.list_id,
                "name": item.name.get(),
                "quantity": item.quantity.value(),
                "acquired": item.acquired.value(),
                "vectorClock": item.vector_clock,
                "createdAt": item.created_at,
                "lastUpdated": item.last_updated,
            }),
        )?;
        Ok(item)
    }

    pub async fn update_name(&self, item_id: &str, name: impl Into<String>) -> Result<Item> {
        let mut set = self.set.lock().await;
        let item = set.update_field(item_id, ItemField::Name(name.into()), None)?;
        drop(set);
        self.store.save_item(&item)?;
        self.enqueue(
            OpType::UpdateName,
            json!({
                "id": item.id,
                "name": item.name.get(),
                "vectorClock": item.vector_clock,
                "lastUpdated": item.last_updated,
            }),
        )?;
        Ok(item)
    }

    pub async fn update_quantity(&self, item_id: &str, quantity: i64) -> Result<Item> {
        if quantity < 0 {
            return Err(Error::BadRequest("quantity must be non-negative".into()));
        }
        let mut set = self.set.lock().await;
        let item = set.update_field(item_id, ItemField::Quantity(quantity), None)?;
        drop(set);
        self.store.save_item(&item)?;
        self.enqueue(
            OpType::UpdateQuantity,
            json!({
                "id": item.id,
                "quantity": item.quantity.value(),
                "acquired": item.acquired.value(),
                "vectorClock": item.vector_clock,
                "lastUpdated": item.last_updated,
            }),
        )?;
        Ok(item)
    }

    /// Flip the checked state: fully acquired, or back to none.
    pub async fn toggle(&self, item_id: &str) -> Result<Item> {
        let mut set = self.set.lock().await;
        let current = set
            .get(item_id)
            .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))?;
        let target = if current.acquired.value() < current.quantity.value() {
            current.quantity.value()
        } else {
            0
        };
        let item = set.update_field(item_id, ItemField::Acquired(target), None)?;
        drop(set);
        self.store.save_item(&item)?;
        self.enqueue(
            OpType::ToggleCheck,
            json!({
                "id": item.id,
                "acquired": item.acquired.value(),
                "vectorClock": item.vector_clock,
                "lastUpdated": item.last_updated,
            }),
        )?;
        Ok(item)
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<()> {
        let mut set = self.set.lock().await;
        set.remove(item_id)?;
        drop(set);
        self.store.delete_item(item_id)?;
        self.enqueue(OpType::RemoveItem, json!({ "id": item_id }))?;
        Ok(())
    }

    // === Local reads ===

    pub fn lists(&self) -> Result<Vec<List>> {
        self.store.all_lists()
    }

    pub async fn list_with_items(&self, id: &str) -> Result<(List, Vec<Item>)> {
        let list = self
            .store
            .get_list(id)?
            .ok_or_else(|| Error::NotFound(format!("list {}", id)))?;
        let set = self.set.lock().await;
        let items = set.items_for_list(id).cloned().collect();
        Ok((list, items))
    }

    fn enqueue(&self, op_type: OpType, data: serde_json::Value) -> Result<()> {
        let op = PendingOp::new(op_type, data);
        self.store.append_pending(&op)?;
        Ok(())
    }

    // === Sync loop ===

    /// Run one sync pass. Returns a skipped report when another pass holds
    /// the guard.
    pub async fn sync(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.sync_guard.try_lock() else {
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        };
        self.syncing.store(true, Ordering::Relaxed);
        let result = self.sync_inner().await;
        self.syncing.store(false, Ordering::Relaxed);
        if let Err(e) = &result {
            tracing::warn!(
                queued = self.pending_count(),
                "sync failed, edits stay pending: {}",
                e
            );
        }
        result
    }

    /// Sync with the exponential-backoff schedule.
    pub async fn sync_with_backoff(&self) -> Result<SyncReport> {
        retry_with_backoff(|| self.sync(), BACKOFF_ATTEMPTS, BACKOFF_BASE).await
    }

    async fn sync_inner(&self) -> Result<SyncReport> {
        let base = self
            .pool
            .next()
            .await
            .ok_or_else(|| Error::InvalidConfig("no servers configured".into()))?;
        let first = !self.first_sync_done.load(Ordering::Relaxed);
        let mut report = SyncReport::default();

        let outcome: Result<()> = async {
            if first {
                self.push_full_state(&base).await?;
            }
            report.pushed = self.push_pending(&base).await?;
            if first {
                report.pulled = self.pull_known_lists(&base).await?;
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                self.store.clear_synced()?;
                self.store.set_last_sync(timestamp_now_millis())?;
                self.first_sync_done.store(true, Ordering::Relaxed);
                tracing::debug!(pushed = report.pushed, pulled = report.pulled, "sync done");
                Ok(report)
            }
            Err(e) => {
                self.pool.mark_failed(&base).await;
                Err(e)
            }
        }
    }

    /// First sync of a session: offer everything we hold. An "already
    /// exists" answer is success.
    async fn push_full_state(&self, base: &str) -> Result<()> {
        for list in self.store.all_lists()? {
            let body = json!({
                "id": list.id,
                "name": list.name.get(),
                "vectorClock": list.vector_clock,
                "createdAt": list.created_at,
                "lastUpdated": list.last_updated,
            });
            let resp = self
                .pool
                .http()
                .post(format!("{}/api/lists", base))
                .json(&body)
                .send()
                .await?;
            if !resp.status().is_success() && resp.status().as_u16() != 409 {
                return Err(Error::Http(format!(
                    "push list {}: {}",
                    list.id,
                    resp.status()
                )));
            }

            for item in self.store.items_for_list(&list.id)? {
                let body = json!({
                    "id": item.id,
                    "name": item.name.get(),
                    "quantity": item.quantity.value(),
                    "acquired": item.acquired.value(),
                    "vectorClock": item.vector_clock,
                    "createdAt": item.created_at,
                    "lastUpdated": item.last_updated,
                });
                let resp = self
                    .pool
                    .http()
                    .post(format!("{}/api/lists/{}/items", base, list.id))
                    .json(&body)
                    .send()
                    .await?;
                if !resp.status().is_success() && resp.status().as_u16() != 409 {
                    return Err(Error::Http(format!(
                        "push item {}: {}",
                        item.id,
                        resp.status()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Push pending operations in timestamp order.
    async fn push_pending(&self, base: &str) -> Result<usize> {
        let ops = self.store.pending_ops()?;
        let mut pushed = 0;
        for op in &ops {
            self.push_op(base, op).await?;
            self.store.mark_synced(op)?;
            pushed += 1;
        }
        Ok(pushed)
    }

    async fn push_op(&self, base: &str, op: &PendingOp) -> Result<()> {
        let data = &op.data;
        let id = data.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        let http = self.pool.http();

        let (resp, tolerated) = match op.op_type {
            OpType::CreateList => (
                http.post(format!("{}/api/lists", base)).json(data).send().await?,
                409,
            ),
            OpType::DeleteList => (
                http.delete(format!("{}/api/lists/{}", base, id)).send().await?,
                404,
            ),
            OpType::AddItem => {
                let list_id = data
                    .get("listId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Corrupted("pending ADD_ITEM without listId".into()))?;
                (
                    http.post(format!("{}/api/lists/{}/items", base, list_id))
                        .json(data)
                        .send()
                        .await?,
                    409,
                )
            }
            OpType::UpdateName => (
                http.patch(format!("{}/api/items/{}/name", base, id))
                    .json(data)
                    .send()
                    .await?,
                0,
            ),
            OpType::UpdateQuantity => (
                http.patch(format!("{}/api/items/{}/quantity", base, id))
                    .json(data)
                    .send()
                    .await?,
                0,
            ),
            OpType::ToggleCheck => (
                http.patch(format!("{}/api/items/{}/toggle", base, id))
                    .json(data)
                    .send()
                    .await?,
                0,
            ),
            OpType::RemoveItem => (
                http.delete(format!("{}/api/items/{}", base, id)).send().await?,
                404,
            ),
        };

        let status = resp.status();
        if status.is_success() || status.as_u16() == tolerated {
            Ok(())
        } else if status.is_client_error() {
            // the cluster rejected this op for good; keeping it would wedge
            // the queue behind an unservable request
            tracing::warn!(op_type = ?op.op_type, id, %status, "dropping rejected operation");
            Ok(())
        } else {
            Err(Error::Http(format!("{:?} {}: {}", op.op_type, id, status)))
        }
    }

    /// First sync of a session: pull every known list back and CRDT-merge
    /// the server copies into local state. Only ids we already hold are
    /// fetched; the server catalog is never enumerated.
    async fn pull_known_lists(&self, base: &str) -> Result<usize> {
        let mut pulled = 0;
        for local_list in self.store.all_lists()? {
            let resp = self
                .pool
                .http()
                .get(format!("{}/api/lists/{}", base, local_list.id))
                .send()
                .await?;
            if resp.status().as_u16() == 404 {
                // not replicated yet; our push will land eventually
                continue;
            }
            if !resp.status().is_success() {
                return Err(Error::Http(format!(
                    "pull list {}: {}",
                    local_list.id,
                    resp.status()
                )));
            }
            let view: ListView = resp.json().await?;
            let mut merged = local_list;
            merged.merge(&view.clone().into_list());
            self.store.save_list(&merged)?;

            let mut set = self.set.lock().await;
            for item_view in view.items.unwrap_or_default() {
                let incoming = item_view.into_item();
                if let Some(item) = set.merge_item(&incoming) {
                    self.store.save_item(&item)?;
                }
            }
            drop(set);
            pulled += 1;
        }
        Ok(pulled)
    }

    // === Server-pushed events ===

    /// Merge one SSE event into local state.
    ///
    /// Events for lists this client never loaded are ignored. Known
    /// entities go through the three-case clock logic; concurrent updates
    /// merge only the fields the event type owns.
    pub async fn apply_server_event(&self, event: &str, data: serde_json::Value) -> Result<()> {
        match event {
            "list-created" => {
                let view: ListView = serde_json::from_value(data)?;
                let Some(mut local) = self.store.get_list(&view.id)? else {
                    return Ok(()); // never loaded here
                };
                local.merge(&view.into_list());
                self.store.save_list(&local)?;
            }
            "list-deleted" => {
                let id = data
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if self.store.get_list(&id)?.is_some() {
                    let mut set = self.set.lock().await;
                    set.remove_list_items(&id);
                    drop(set);
                    self.store.delete_list(&id)?;
                }
            }
            "item-added" => {
                let incoming = parse_item(data)?;
                if self.store.get_list(&incoming.list_id)?.is_none() {
                    return Ok(());
                }
                let mut set = self.set.lock().await;
                if set.get(&incoming.id).is_none() {
                    set.add(incoming.clone());
                    drop(set);
                    self.store.save_item(&incoming)?;
                } else {
                    drop(set);
                    self.merge_event_item(&incoming, EventScope::Full).await?;
                }
            }
            "item-removed" => {
                let id = data
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let mut set = self.set.lock().await;
                if set.remove(&id).is_ok() {
                    drop(set);
                    self.store.delete_item(&id)?;
                }
            }
            "item-toggled" => {
                let incoming = parse_item(data)?;
                self.merge_event_item(&incoming, EventScope::Acquired).await?;
            }
            "item-quantity-updated" => {
                let incoming = parse_item(data)?;
                self.merge_event_item(&incoming, EventScope::Counters).await?;
            }
            "item-name-updated" => {
                let incoming = parse_item(data)?;
                self.merge_event_item(&incoming, EventScope::Name).await?;
            }
            "item-updated" => {
                let incoming = parse_item(data)?;
                self.merge_event_item(&incoming, EventScope::Full).await?;
            }
            other => {
                tracing::debug!(event = other, "ignoring unknown event");
            }
        }
        Ok(())
    }

    async fn merge_event_item(&self, incoming: &Item, scope: EventScope) -> Result<()> {
        if self.store.get_list(&incoming.list_id)?.is_none() {
            return Ok(()); // privacy boundary: list never loaded
        }
        let mut set = self.set.lock().await;
        let Some(local) = set.get(&incoming.id).cloned() else {
            return Ok(());
        };

        let updated = match incoming.vector_clock.compare(&local.vector_clock) {
            ClockOrdering::Before => return Ok(()),
            ClockOrdering::After | ClockOrdering::Equal => {
                set.adopt(incoming.clone());
                incoming.clone()
            }
            ClockOrdering::Concurrent => {
                let mut merged = local;
                match scope {
                    EventScope::Acquired => merged.acquired.merge(&incoming.acquired),
                    EventScope::Counters => {
                        merged.quantity.merge(&incoming.quantity);
                        merged.acquired.merge(&incoming.acquired);
                    }
                    EventScope::Name => merged.name.merge(&incoming.name),
                    EventScope::Full => {
                        merged.name.merge(&incoming.name);
                        merged.quantity.merge(&incoming.quantity);
                        merged.acquired.merge(&incoming.acquired);
                    }
                }
                merged.vector_clock.merge(&incoming.vector_clock);
                merged.last_updated = merged.last_updated.max(incoming.last_updated);
                set.adopt(merged.clone());
                merged
            }
        };
        drop(set);
        self.store.save_item(&updated)?;
        Ok(())
    }
}

/// Which fields an event type is allowed to merge on a concurrent clock.
#[derive(Debug, Clone, Copy)]
enum EventScope {
    Acquired,
    Counters,
    Name,
    Full,
}

/// Event payloads are item views with the CRDT state attached.
fn parse_item(data: serde_json::Value) -> Result<Item> {
    let view: crate::crdt::ItemView = serde_json::from_value(data)?;
    Ok(view.into_item())
}
