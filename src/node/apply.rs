//! Vector-clock-aware apply logic
//!
//! Every write — from a client over HTTP or from a peer over the
//! replication channel — funnels through the same state machine:
//!
//! 1. Stamp the incoming clock with this node's component.
//! 2. Compare against the locally stored clock.
//! 3. `before` → ignore and reply with the existing state; `after`/`equal`
//!    → adopt; `concurrent` → field-wise CRDT merge and clock merge.
//!
//! Client writes carry flat target values, which are converted to counter
//! deltas or LWW sets charged to the originating client's identity (read
//! off the clock component the request advanced), so the same edit made
//! through two different nodes lands in one tally. Replication messages
//! carry full CRDT documents and merge state-wise. When an operation
//! targets an item this node does not hold yet, the node bootstraps a
//! baseline with a quorum read first, so any node can coordinate any key.

use crate::cluster::message::DataType;
use crate::common::{timestamp_now_millis, Error, Result};
use crate::crdt::{AworSet, ClockOrdering, Item, List, VectorClock};
use crate::node::context::NodeContext;

/// What a write did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    /// Incoming state was causally older; local state replied unchanged
    Ignored,
}

/// Flat client payload for creating a list.
#[derive(Debug, Clone, Default)]
pub struct CreateListInput {
    pub id: Option<String>,
    pub name: String,
    pub vector_clock: Option<VectorClock>,
    pub created_at: Option<u64>,
    pub last_updated: Option<u64>,
}

/// Flat client payload for adding an item.
#[derive(Debug, Clone, Default)]
pub struct AddItemInput {
    pub id: Option<String>,
    pub name: String,
    pub quantity: Option<i64>,
    pub acquired: Option<i64>,
    pub vector_clock: Option<VectorClock>,
    pub created_at: Option<u64>,
    pub last_updated: Option<u64>,
}

/// Flat client payload for item updates.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub quantity: Option<i64>,
    pub acquired: Option<i64>,
    pub vector_clock: Option<VectorClock>,
    pub last_updated: Option<u64>,
}

/// Which fields an update is allowed to touch. A toggle only ever moves
/// `acquired`; a quantity update may move both counters; a rename only the
/// name register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Name,
    Quantity,
    Toggle,
}

/// The identity a client write is charged to: the component of the
/// incoming clock that moved past the locally stored one (clients bump
/// their own component before pushing). A request with no clock evidence
/// is charged to this node.
fn originating_writer(
    incoming: Option<&VectorClock>,
    local: &VectorClock,
    node_id: &str,
) -> String {
    let Some(incoming) = incoming else {
        return node_id.to_string();
    };
    incoming
        .nodes()
        .find(|n| incoming.get(n) > local.get(n))
        .map(|n| n.to_string())
        .unwrap_or_else(|| node_id.to_string())
}

// === Client-facing writes ===

/// Create a list. The id is client-chosen when present; an existing id is a
/// conflict.
pub async fn create_list(ctx: &NodeContext, input: CreateListInput) -> Result<List> {
    let id = input
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if ctx.store.get_list(&id)?.is_some() {
        return Err(Error::Conflict(format!("list {}", id)));
    }

    let now = timestamp_now_millis();
    let created_at = input.created_at.unwrap_or(now);
    let last_updated = input.last_updated.unwrap_or(now);
    let writer = originating_writer(
        input.vector_clock.as_ref(),
        &VectorClock::new(),
        &ctx.node_id,
    );
    let mut vector_clock = input.vector_clock.unwrap_or_default();
    vector_clock.increment(&ctx.node_id);

    let list = List {
        id,
        name: crate::crdt::LwwRegister::with_timestamp(input.name, last_updated, writer),
        created_at,
        last_updated,
        vector_clock,
    };
    ctx.store.save_list(&list)?;
    Ok(list)
}

/// Delete a list and cascade to its items. Returns the deleted list.
pub async fn delete_list(ctx: &NodeContext, id: &str) -> Result<List> {
    let list = ctx
        .store
        .get_list(id)?
        .ok_or_else(|| Error::NotFound(format!("list {}", id)))?;
    let mut set = ctx.set.lock().await;
    set.remove_list_items(id);
    ctx.store.delete_list(id)?;
    Ok(list)
}

/// Add an item to a list. Bootstraps the list from the cluster when this
/// node has never seen it.
pub async fn add_item(ctx: &NodeContext, list_id: &str, input: AddItemInput) -> Result<Item> {
    if ctx.store.get_list(list_id)?.is_none() {
        bootstrap_list(ctx, list_id).await?;
    }

    let id = input
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut set = ctx.set.lock().await;
    if set.contains(&id) || ctx.store.get_item(&id)?.is_some() {
        return Err(Error::Conflict(format!("item {}", id)));
    }

    let now = timestamp_now_millis();
    let created_at = input.created_at.unwrap_or(now);
    let last_updated = input.last_updated.unwrap_or(now);
    let writer = originating_writer(
        input.vector_clock.as_ref(),
        &VectorClock::new(),
        &ctx.node_id,
    );
    let mut vector_clock = input.vector_clock.unwrap_or_default();
    vector_clock.increment(&ctx.node_id);

    let mut quantity = crate::crdt::PnCounter::new();
    quantity.set_value(&writer, input.quantity.unwrap_or(1));
    let mut acquired = crate::crdt::PnCounter::new();
    if let Some(a) = input.acquired {
        acquired.set_value(&writer, a);
    }

    let item = Item {
        id,
        list_id: list_id.to_string(),
        name: crate::crdt::LwwRegister::with_timestamp(input.name, last_updated, writer.clone()),
        quantity,
        acquired,
        created_at,
        last_updated,
        vector_clock,
    };
    set.add(item.clone());
    ctx.store.save_item(&item)?;
    Ok(item)
}

/// Update one item with flat target values, under the three-case clock
/// logic. Returns the resulting item and what happened.
pub async fn patch_item(
    ctx: &NodeContext,
    item_id: &str,
    kind: PatchKind,
    patch: ItemPatch,
) -> Result<(Item, Applied)> {
    let mut set = ctx.set.lock().await;
    let local = match set.get(item_id).cloned() {
        Some(item) => item,
        None => bootstrap_item(ctx, &mut set, item_id).await?,
    };

    let writer = originating_writer(
        patch.vector_clock.as_ref(),
        &local.vector_clock,
        &ctx.node_id,
    );
    let mut stamped = patch.vector_clock.clone().unwrap_or_default();
    stamped.raise(&ctx.node_id, local.vector_clock.get(&ctx.node_id) + 1);
    let stamp_ts = patch.last_updated.unwrap_or_else(timestamp_now_millis);

    let ordering = stamped.compare(&local.vector_clock);
    if ordering == ClockOrdering::Before {
        return Ok((local, Applied::Ignored));
    }

    let mut item = local;
    apply_patch_fields(&mut item, &writer, kind, &patch, stamp_ts);
    match ordering {
        ClockOrdering::After | ClockOrdering::Equal => {
            item.vector_clock = stamped;
        }
        ClockOrdering::Concurrent => {
            item.vector_clock.merge(&stamped);
        }
        ClockOrdering::Before => unreachable!(),
    }
    item.last_updated = item.last_updated.max(stamp_ts);

    set.adopt(item.clone());
    ctx.store.save_item(&item)?;
    Ok((item, Applied::Updated))
}

/// Remove an item. Returns the removed item.
pub async fn remove_item(ctx: &NodeContext, item_id: &str) -> Result<Item> {
    let mut set = ctx.set.lock().await;
    let item = set.remove(item_id)?;
    ctx.store.delete_item(item_id)?;
    Ok(item)
}

/// Target values become counter deltas or LWW sets charged to the
/// originating writer; raw tally assignment never happens here.
fn apply_patch_fields(
    item: &mut Item,
    writer: &str,
    kind: PatchKind,
    patch: &ItemPatch,
    stamp_ts: u64,
) {
    match kind {
        PatchKind::Name => {
            if let Some(name) = &patch.name {
                item.name.set_at(name.clone(), stamp_ts, writer);
            }
        }
        PatchKind::Quantity => {
            if let Some(q) = patch.quantity {
                item.quantity.set_value(writer, q);
            }
            if let Some(a) = patch.acquired {
                item.acquired.set_value(writer, a);
            }
        }
        PatchKind::Toggle => {
            if let Some(a) = patch.acquired {
                item.acquired.set_value(writer, a);
            }
        }
    }
}

// === Replica-facing writes (full CRDT documents) ===

/// Apply a replicated list creation.
pub async fn replica_create_list(ctx: &NodeContext, incoming: &List) -> Result<Applied> {
    match ctx.store.get_list(&incoming.id)? {
        None => {
            ctx.store.save_list(incoming)?;
            Ok(Applied::Created)
        }
        Some(mut local) => match incoming.vector_clock.compare(&local.vector_clock) {
            ClockOrdering::Before => Ok(Applied::Ignored),
            ClockOrdering::After | ClockOrdering::Equal => {
                ctx.store.save_list(incoming)?;
                Ok(Applied::Updated)
            }
            ClockOrdering::Concurrent => {
                local.merge(incoming);
                ctx.store.save_list(&local)?;
                Ok(Applied::Updated)
            }
        },
    }
}

/// Apply a replicated list deletion (idempotent).
pub async fn replica_delete_list(ctx: &NodeContext, list_id: &str) -> Result<Applied> {
    let mut set = ctx.set.lock().await;
    set.remove_list_items(list_id);
    let existed = ctx.store.delete_list(list_id)?;
    Ok(if existed {
        Applied::Updated
    } else {
        Applied::Ignored
    })
}

/// Apply a replicated item add. Re-adding into a deleted list is a no-op;
/// an add for an id we already hold merges under the clock rules.
pub async fn replica_add_item(ctx: &NodeContext, incoming: &Item) -> Result<Applied> {
    if ctx.store.get_list(&incoming.list_id)?.is_none() {
        // the list was deleted here; the cascade wins over the replay
        return Ok(Applied::Ignored);
    }
    let mut set = ctx.set.lock().await;
    if set.contains(&incoming.id) {
        drop(set);
        return replica_update_item(ctx, incoming, None).await;
    }
    set.add(incoming.clone());
    ctx.store.save_item(incoming)?;
    Ok(Applied::Created)
}

/// Apply a replicated item update.
///
/// `restrict` narrows which fields a concurrent merge may touch: a toggle
/// replays only `acquired`, a quantity update only the counters, a rename
/// only the name register. `None` merges every field.
pub async fn replica_update_item(
    ctx: &NodeContext,
    incoming: &Item,
    restrict: Option<PatchKind>,
) -> Result<Applied> {
    let mut set = ctx.set.lock().await;
    let Some(local) = set.get(&incoming.id).cloned() else {
        // Unknown id: adopt unless it was removed here (updates are not adds)
        return match set.merge_item(incoming) {
            Some(item) => {
                ctx.store.save_item(&item)?;
                Ok(Applied::Created)
            }
            None => Ok(Applied::Ignored),
        };
    };

    match incoming.vector_clock.compare(&local.vector_clock) {
        ClockOrdering::Before => Ok(Applied::Ignored),
        ClockOrdering::After | ClockOrdering::Equal => {
            set.adopt(incoming.clone());
            ctx.store.save_item(incoming)?;
            Ok(Applied::Updated)
        }
        ClockOrdering::Concurrent => {
            let mut merged = local;
            match restrict {
                Some(PatchKind::Toggle) => {
                    merged.acquired.merge(&incoming.acquired);
                }
                Some(PatchKind::Quantity) => {
                    merged.quantity.merge(&incoming.quantity);
                    merged.acquired.merge(&incoming.acquired);
                }
                Some(PatchKind::Name) => {
                    merged.name.merge(&incoming.name);
                }
                None => {
                    merged.name.merge(&incoming.name);
                    merged.quantity.merge(&incoming.quantity);
                    merged.acquired.merge(&incoming.acquired);
                }
            }
            merged.vector_clock.merge(&incoming.vector_clock);
            merged.last_updated = merged.last_updated.max(incoming.last_updated);
            set.adopt(merged.clone());
            ctx.store.save_item(&merged)?;
            Ok(Applied::Updated)
        }
    }
}

/// Apply a replicated item removal (idempotent).
pub async fn replica_remove_item(ctx: &NodeContext, item_id: &str) -> Result<Applied> {
    let mut set = ctx.set.lock().await;
    match set.remove(item_id) {
        Ok(_) => {
            ctx.store.delete_item(item_id)?;
            Ok(Applied::Updated)
        }
        Err(Error::NotFound(_)) => Ok(Applied::Ignored),
        Err(e) => Err(e),
    }
}

// === Bootstrap on miss ===

/// Fetch a baseline copy of an item (and, if needed, its list) from the
/// cluster before coordinating a write for a key this node has never held.
async fn bootstrap_item(ctx: &NodeContext, set: &mut AworSet, item_id: &str) -> Result<Item> {
    let Some(quorum) = &ctx.quorum else {
        return Err(Error::NotFound(format!("item {}", item_id)));
    };
    let doc = quorum
        .read(item_id, DataType::Item, None)
        .await?
        .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))?;
    let item: Item = serde_json::from_value(doc)?;

    if ctx.store.get_list(&item.list_id)?.is_none() {
        if let Ok(Some(list_doc)) = quorum.read(&item.list_id, DataType::List, None).await {
            let list: List = serde_json::from_value(list_doc)?;
            ctx.store.save_list(&list)?;
        }
    }

    set.adopt(item.clone());
    ctx.store.save_item(&item)?;
    tracing::debug!(item = %item_id, "bootstrapped baseline from quorum read");
    Ok(item)
}

/// Fetch a baseline copy of a list from the cluster.
async fn bootstrap_list(ctx: &NodeContext, list_id: &str) -> Result<List> {
    let Some(quorum) = &ctx.quorum else {
        return Err(Error::NotFound(format!("list {}", list_id)));
    };
    let doc = quorum
        .read(list_id, DataType::List, None)
        .await?
        .ok_or_else(|| Error::NotFound(format!("list {}", list_id)))?;
    let list: List = serde_json::from_value(doc)?;
    ctx.store.save_list(&list)?;
    tracing::debug!(list = %list_id, "bootstrapped baseline from quorum read");
    Ok(list)
}
